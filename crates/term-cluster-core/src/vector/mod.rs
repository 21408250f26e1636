//! Term vectors: the items being clustered.
//!
//! A [`TermVector`] is a keyed, frequency-weighted sparse feature vector.
//! Callers own their vectors; the engines borrow them for the duration of a
//! call and only allocate vectors of their own for cluster centroids.

mod similarity;
mod sparse;

pub use similarity::{Similarity, SimilarityFn, SimilarityMeasure};
pub use sparse::SparseWeights;

use serde::{Deserialize, Serialize};

/// Sparse weighted feature representation of one item.
///
/// # Example
///
/// ```
/// use term_cluster_core::vector::{SimilarityMeasure, TermVector};
///
/// let bank = TermVector::from_pairs("bank", 12.0, vec![(0, 1.0), (1, 0.5)]);
/// let shore = TermVector::from_pairs("shore", 3.0, vec![(1, 1.0)]);
///
/// let s = bank.similarity(&shore, SimilarityMeasure::Cosine);
/// assert!(s > 0.0 && s < 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermVector {
    key: String,
    frequency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cluster_label: Option<String>,
    weights: SparseWeights,
}

impl TermVector {
    /// Create a vector with the given key, frequency and weights.
    pub fn new(key: impl Into<String>, frequency: f64, weights: SparseWeights) -> Self {
        Self {
            key: key.into(),
            frequency,
            seed: None,
            cluster_label: None,
            weights,
        }
    }

    /// Create a vector from unordered `(feature, weight)` pairs.
    pub fn from_pairs(key: impl Into<String>, frequency: f64, pairs: Vec<(u32, f32)>) -> Self {
        Self::new(key, frequency, SparseWeights::from_pairs(pairs))
    }

    /// Attach a seed cluster label.
    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// Identity key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Frequency count.
    #[inline]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Set the frequency count.
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    /// Pre-assigned seed cluster label, if any.
    #[inline]
    pub fn seed(&self) -> Option<&str> {
        self.seed.as_deref()
    }

    /// Set or clear the seed label.
    pub fn set_seed(&mut self, seed: Option<String>) {
        self.seed = seed;
    }

    /// Output cluster label assigned by a clustering run.
    #[inline]
    pub fn cluster_label(&self) -> Option<&str> {
        self.cluster_label.as_deref()
    }

    /// Set or clear the output cluster label.
    pub fn set_cluster_label(&mut self, label: Option<String>) {
        self.cluster_label = label;
    }

    /// Feature weights.
    #[inline]
    pub fn weights(&self) -> &SparseWeights {
        &self.weights
    }

    /// Mutable feature weights.
    #[inline]
    pub fn weights_mut(&mut self) -> &mut SparseWeights {
        &mut self.weights
    }

    /// Similarity under one of the enumerated measures.
    pub fn similarity(&self, other: &TermVector, measure: SimilarityMeasure) -> f64 {
        measure.score(self, other)
    }

    /// Absorb `other` into this vector: weights are added feature-wise.
    ///
    /// Frequency is left untouched; the caller decides between sum and max.
    pub fn absorb(&mut self, other: &TermVector) {
        self.weights.add_assign(&other.weights);
    }

    /// Copy of this vector with every weight multiplied by `factor`.
    ///
    /// Key, frequency and labels are kept.
    pub fn scaled(&self, factor: f32) -> TermVector {
        let mut out = self.clone();
        out.weights.scale(factor);
        out
    }

    /// Copy of this vector re-keyed as a centroid. Labels are not copied.
    pub fn to_centroid(&self, key: impl Into<String>) -> TermVector {
        TermVector {
            key: key.into(),
            frequency: self.frequency,
            seed: None,
            cluster_label: None,
            weights: self.weights.clone(),
        }
    }
}
