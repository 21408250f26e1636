//! Cluster records and centroid maintenance.
//!
//! A [`ClusterRecord`] owns its centroid and lists its members as indices
//! into the caller's vector arena. Member count is always the length of the
//! member list.

use crate::vector::{SparseWeights, TermVector};

use super::params::{ClusteringParams, Representative};

/// One cluster: an owned centroid plus borrowed members.
///
/// # Example
///
/// ```
/// use term_cluster_core::clustering::{ClusterRecord, ClusteringParams};
/// use term_cluster_core::vector::TermVector;
///
/// let a = TermVector::from_pairs("a", 2.0, vec![(0, 1.0)]);
/// let b = TermVector::from_pairs("b", 3.0, vec![(0, 1.0), (1, 1.0)]);
/// let arena = [&a, &b];
///
/// let record = ClusterRecord::from_members("C1", vec![0, 1], &arena, &ClusteringParams::default());
/// assert_eq!(record.len(), 2);
/// assert_eq!(record.frequency(), 5.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    centroid: TermVector,
    members: Vec<usize>,
    representative: Option<usize>,
}

impl ClusterRecord {
    /// Single-member cluster.
    pub fn singleton(name: &str, index: usize, vector: &TermVector) -> Self {
        Self {
            centroid: vector.to_centroid(name),
            members: vec![index],
            representative: Some(index),
        }
    }

    /// Cluster over `members`, centroid computed per the representative mode.
    pub fn from_members(
        name: &str,
        members: Vec<usize>,
        vectors: &[&TermVector],
        params: &ClusteringParams,
    ) -> Self {
        let (centroid, representative) = build_centroid(name, &members, vectors, params);
        Self {
            centroid,
            members,
            representative,
        }
    }

    /// The cluster centroid.
    #[inline]
    pub fn centroid(&self) -> &TermVector {
        &self.centroid
    }

    /// Member indices, in insertion order.
    #[inline]
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Live member count.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the cluster has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Merged frequency of the cluster.
    #[inline]
    pub fn frequency(&self) -> f64 {
        self.centroid.frequency()
    }

    /// Member promoted to act as centroid, for nearest/furthest modes and
    /// singletons.
    #[inline]
    pub fn representative_member(&self) -> Option<usize> {
        self.representative
    }

    /// Seed labels carried by members, in member order, deduplicated.
    pub fn seeds<'a>(&self, vectors: &[&'a TermVector]) -> Vec<&'a str> {
        let mut out: Vec<&'a str> = Vec::new();
        for &m in &self.members {
            if let Some(seed) = vectors[m].seed() {
                if !out.contains(&seed) {
                    out.push(seed);
                }
            }
        }
        out
    }

    /// Mean similarity of members to the centroid.
    pub fn cohesion(&self, vectors: &[&TermVector], params: &ClusteringParams) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .members
            .iter()
            .map(|&m| params.similarity.score(vectors[m], &self.centroid))
            .sum();
        total / self.members.len() as f64
    }

    /// Add one vector, updating the centroid.
    pub fn add_member(&mut self, index: usize, vectors: &[&TermVector], params: &ClusteringParams) {
        let vector = vectors[index];
        self.members.push(index);
        match params.representative {
            Representative::Centroid => {
                let freq = params.merged_frequency(self.centroid.frequency(), vector.frequency());
                self.centroid.absorb(vector);
                self.centroid.set_frequency(freq);
                self.representative = None;
            }
            _ => self.recompute(vectors, params),
        }
    }

    /// Absorb `other` into this record: members are concatenated, the
    /// centroid is combined per the representative mode and the frequency
    /// becomes the sum or max of both per `sum_sizes`.
    pub fn merge(&mut self, other: ClusterRecord, vectors: &[&TermVector], params: &ClusteringParams) {
        let freq = params.merged_frequency(self.frequency(), other.frequency());
        self.members.extend(other.members);
        match params.representative {
            Representative::Centroid => {
                self.centroid.absorb(&other.centroid);
                self.representative = None;
            }
            _ => self.recompute(vectors, params),
        }
        self.centroid.set_frequency(freq);
    }

    /// Replace the member list and recompute the centroid.
    pub fn set_members(&mut self, members: Vec<usize>, vectors: &[&TermVector], params: &ClusteringParams) {
        self.members = members;
        self.recompute(vectors, params);
    }

    /// Recompute the centroid from the current members.
    pub fn recompute(&mut self, vectors: &[&TermVector], params: &ClusteringParams) {
        let name = self.centroid.key().to_string();
        let (centroid, representative) = build_centroid(&name, &self.members, vectors, params);
        self.centroid = centroid;
        self.representative = representative;
    }

    /// Rename the centroid key after the record moved under another name.
    pub(crate) fn rekey(&mut self, name: &str) {
        let mut centroid = self.centroid.to_centroid(name);
        centroid.set_frequency(self.centroid.frequency());
        self.centroid = centroid;
    }
}

/// Compute a centroid for `members` under the representative mode.
///
/// Returns the centroid and, for member-promoting modes, the promoted
/// member index.
pub(crate) fn build_centroid(
    name: &str,
    members: &[usize],
    vectors: &[&TermVector],
    params: &ClusteringParams,
) -> (TermVector, Option<usize>) {
    let frequency = members
        .iter()
        .map(|&m| vectors[m].frequency())
        .reduce(|a, b| params.merged_frequency(a, b))
        .unwrap_or(0.0);

    if let [only] = members {
        let mut centroid = vectors[*only].to_centroid(name);
        centroid.set_frequency(frequency);
        return (centroid, Some(*only));
    }

    let n = members.len().max(1) as f32;
    let mut sum = SparseWeights::new();
    for &m in members {
        sum.add_assign(vectors[m].weights());
    }

    let (weights, representative) = match params.representative {
        Representative::Centroid => (sum, None),
        Representative::Average => {
            sum.scale(1.0 / n);
            (sum, None)
        }
        Representative::Rms => {
            let mut squares = SparseWeights::new();
            for &m in members {
                let mut sq = vectors[m].weights().clone();
                sq.map_weights(|w| w * w);
                squares.add_assign(&sq);
            }
            squares.map_weights(|w| (w / n).sqrt());
            (squares, None)
        }
        Representative::Nearest | Representative::Furthest => {
            sum.scale(1.0 / n);
            let mean = TermVector::new(name, frequency, sum);
            let nearest = params.representative == Representative::Nearest;
            let mut chosen: Option<(usize, f64)> = None;
            for &m in members {
                let s = params.similarity.score(vectors[m], &mean);
                let better = match chosen {
                    None => true,
                    Some((_, best)) if nearest => s > best,
                    Some((_, best)) => s < best,
                };
                if better {
                    chosen = Some((m, s));
                }
            }
            match chosen {
                Some((m, _)) => (vectors[m].weights().clone(), Some(m)),
                None => (SparseWeights::new(), None),
            }
        }
    };

    (TermVector::new(name, frequency, weights), representative)
}
