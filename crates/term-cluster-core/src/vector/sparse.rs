//! Sparse weight storage for term vectors.
//!
//! Weights are kept as two parallel arrays sorted by feature id, which makes
//! every pairwise primitive a single linear merge over both operands.

use serde::{Deserialize, Serialize};

/// Sparse feature weights, sorted ascending by feature id.
///
/// # Invariants
/// - `ids.len() == weights.len()`
/// - `ids` strictly ascending (no duplicates)
///
/// # Example
///
/// ```
/// use term_cluster_core::vector::SparseWeights;
///
/// let w = SparseWeights::from_pairs(vec![(7, 0.5), (2, 1.0), (7, 0.5)]);
/// assert_eq!(w.nnz(), 2);
/// assert_eq!(w.get(7), 1.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseWeights {
    ids: Vec<u32>,
    weights: Vec<f32>,
}

impl SparseWeights {
    /// Create empty weights.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unordered `(feature, weight)` pairs.
    ///
    /// Duplicate features are summed and zero weights dropped.
    pub fn from_pairs(mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.sort_unstable_by_key(|&(id, _)| id);

        let mut ids: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut weights: Vec<f32> = Vec::with_capacity(pairs.len());
        for (id, w) in pairs {
            match ids.last() {
                Some(&last) if last == id => {
                    if let Some(acc) = weights.last_mut() {
                        *acc += w;
                    }
                }
                _ => {
                    ids.push(id);
                    weights.push(w);
                }
            }
        }

        let mut out = Self { ids, weights };
        out.prune_zeros();
        out
    }

    /// Number of non-zero features.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.ids.len()
    }

    /// True when no feature carries weight.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Weight of `feature`, zero when absent.
    pub fn get(&self, feature: u32) -> f32 {
        match self.ids.binary_search(&feature) {
            Ok(pos) => self.weights[pos],
            Err(_) => 0.0,
        }
    }

    /// Iterate `(feature, weight)` pairs in ascending feature order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.ids.iter().copied().zip(self.weights.iter().copied())
    }

    /// Dot product.
    pub fn dot(&self, other: &SparseWeights) -> f64 {
        let mut acc = 0.0f64;
        self.merge_walk(other, |a, b| acc += a as f64 * b as f64);
        acc
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        self.weights
            .iter()
            .map(|&w| (w as f64) * (w as f64))
            .sum::<f64>()
            .sqrt()
    }

    /// Sum of weights.
    pub fn total(&self) -> f64 {
        self.weights.iter().map(|&w| w as f64).sum()
    }

    /// Sum of `min(a, b)` over the feature union.
    pub fn min_sum(&self, other: &SparseWeights) -> f64 {
        let mut acc = 0.0f64;
        self.merge_walk(other, |a, b| acc += a.min(b) as f64);
        acc
    }

    /// Sum of `max(a, b)` over the feature union.
    pub fn max_sum(&self, other: &SparseWeights) -> f64 {
        let mut acc = 0.0f64;
        self.union_walk(other, |a, b| acc += a.max(b) as f64);
        acc
    }

    /// Squared Euclidean distance.
    pub fn squared_distance(&self, other: &SparseWeights) -> f64 {
        let mut acc = 0.0f64;
        self.union_walk(other, |a, b| {
            let d = (a - b) as f64;
            acc += d * d;
        });
        acc
    }

    /// Add `other` into `self` feature-wise.
    pub fn add_assign(&mut self, other: &SparseWeights) {
        self.combine(other, |a, b| a + b);
    }

    /// Feature-wise maximum of `self` and `other`.
    pub fn max_assign(&mut self, other: &SparseWeights) {
        self.combine(other, f32::max);
    }

    /// Multiply every weight by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for w in &mut self.weights {
            *w *= factor;
        }
        self.prune_zeros();
    }

    /// Replace every weight with `f(weight)`.
    pub fn map_weights(&mut self, f: impl Fn(f32) -> f32) {
        for w in &mut self.weights {
            *w = f(*w);
        }
        self.prune_zeros();
    }

    /// Walk features present in both operands.
    fn merge_walk(&self, other: &SparseWeights, mut f: impl FnMut(f32, f32)) {
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    f(self.weights[i], other.weights[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
    }

    /// Walk the feature union, substituting zero for missing weights.
    fn union_walk(&self, other: &SparseWeights, mut f: impl FnMut(f32, f32)) {
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() || j < other.ids.len() {
            let left = self.ids.get(i).copied();
            let right = other.ids.get(j).copied();
            match (left, right) {
                (Some(a), Some(b)) if a == b => {
                    f(self.weights[i], other.weights[j]);
                    i += 1;
                    j += 1;
                }
                (Some(a), Some(b)) if a < b => {
                    f(self.weights[i], 0.0);
                    i += 1;
                }
                (Some(_), None) => {
                    f(self.weights[i], 0.0);
                    i += 1;
                }
                _ => {
                    f(0.0, other.weights[j]);
                    j += 1;
                }
            }
        }
    }

    fn combine(&mut self, other: &SparseWeights, op: impl Fn(f32, f32) -> f32) {
        let mut ids = Vec::with_capacity(self.ids.len() + other.ids.len());
        let mut weights = Vec::with_capacity(self.ids.len() + other.ids.len());
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() || j < other.ids.len() {
            let left = self.ids.get(i).copied();
            let right = other.ids.get(j).copied();
            match (left, right) {
                (Some(a), Some(b)) if a == b => {
                    ids.push(a);
                    weights.push(op(self.weights[i], other.weights[j]));
                    i += 1;
                    j += 1;
                }
                (Some(a), Some(b)) if a < b => {
                    ids.push(a);
                    weights.push(op(self.weights[i], 0.0));
                    i += 1;
                }
                (Some(a), None) => {
                    ids.push(a);
                    weights.push(op(self.weights[i], 0.0));
                    i += 1;
                }
                (_, Some(b)) => {
                    ids.push(b);
                    weights.push(op(0.0, other.weights[j]));
                    j += 1;
                }
                (None, None) => break,
            }
        }
        self.ids = ids;
        self.weights = weights;
        self.prune_zeros();
    }

    fn prune_zeros(&mut self) {
        if self.weights.iter().all(|&w| w != 0.0) {
            return;
        }
        let mut keep_ids = Vec::with_capacity(self.ids.len());
        let mut keep_weights = Vec::with_capacity(self.ids.len());
        for (id, w) in self.iter() {
            if w != 0.0 {
                keep_ids.push(id);
                keep_weights.push(w);
            }
        }
        self.ids = keep_ids;
        self.weights = keep_weights;
    }
}

impl FromIterator<(u32, f32)> for SparseWeights {
    fn from_iter<I: IntoIterator<Item = (u32, f32)>>(iter: I) -> Self {
        Self::from_pairs(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(pairs: &[(u32, f32)]) -> SparseWeights {
        SparseWeights::from_pairs(pairs.to_vec())
    }

    #[test]
    fn test_from_pairs_sorts_and_sums() {
        let weights = w(&[(5, 1.0), (1, 2.0), (5, 0.5), (3, 0.0)]);
        let pairs: Vec<(u32, f32)> = weights.iter().collect();
        assert_eq!(pairs, vec![(1, 2.0), (5, 1.5)]);
    }

    #[test]
    fn test_dot_and_norm() {
        let a = w(&[(1, 1.0), (2, 2.0)]);
        let b = w(&[(2, 3.0), (9, 4.0)]);
        assert!((a.dot(&b) - 6.0).abs() < 1e-9);
        assert!((b.norm() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_max_sums() {
        let a = w(&[(1, 1.0), (2, 2.0)]);
        let b = w(&[(2, 3.0), (9, 4.0)]);
        assert!((a.min_sum(&b) - 2.0).abs() < 1e-9);
        assert!((a.max_sum(&b) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_squared_distance_over_union() {
        let a = w(&[(1, 1.0)]);
        let b = w(&[(2, 1.0)]);
        assert!((a.squared_distance(&b) - 2.0).abs() < 1e-9);
        assert_eq!(a.squared_distance(&a), 0.0);
    }

    #[test]
    fn test_add_and_max_assign() {
        let mut a = w(&[(1, 1.0), (4, 1.0)]);
        a.add_assign(&w(&[(1, 2.0), (3, 5.0)]));
        assert_eq!(a.get(1), 3.0);
        assert_eq!(a.get(3), 5.0);
        assert_eq!(a.get(4), 1.0);

        let mut m = w(&[(1, 1.0)]);
        m.max_assign(&w(&[(1, 0.5), (2, 2.0)]));
        assert_eq!(m.get(1), 1.0);
        assert_eq!(m.get(2), 2.0);
    }

    #[test]
    fn test_scale_to_zero_prunes() {
        let mut a = w(&[(1, 1.0), (2, 2.0)]);
        a.scale(0.0);
        assert!(a.is_empty());
    }
}
