//! Clustering parameters.
//!
//! # Defaults
//!
//! - desired_clusters: 10
//! - max_iterations: 20
//! - backoff_step: 0.05
//! - cache_size: 0 (neighbor cache disabled)
//! - alpha: 0.1, beta: 0.7 (tight clustering)
//! - threshold: constant 0.3
//!
//! Values set through the `with_*` builders are NOT validated until
//! [`ClusteringParams::validate`] runs; every entry point validates first.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;
use crate::vector::{Similarity, SimilarityMeasure};

use super::threshold::ThresholdList;

/// Default number of clusters requested.
pub const DEFAULT_DESIRED_CLUSTERS: usize = 10;

/// Default iteration cap (k-means rounds, spectral restarts).
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Default matrix cap for tight and spectral clustering.
pub const DEFAULT_MAX_MATRIX_SIZE: usize = 4096;

// =============================================================================
// Enumerations
// =============================================================================

/// Clustering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    /// One pass, vector-to-centroid similarity.
    Incremental,
    /// One pass, mean vector-to-member similarity.
    GroupAverage,
    /// Bottom-up merging of the closest pair.
    #[default]
    Agglomerative,
    /// Plain k-means over the term vectors.
    KMeans,
    /// Resampling-based high-confidence clusters.
    Tight,
    /// Eigenspace embedding plus k-means.
    Spectral,
}

impl ClusterMethod {
    /// All methods.
    pub fn all() -> [Self; 6] {
        [
            Self::Incremental,
            Self::GroupAverage,
            Self::Agglomerative,
            Self::KMeans,
            Self::Tight,
            Self::Spectral,
        ]
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::GroupAverage => "group_average",
            Self::Agglomerative => "agglomerative",
            Self::KMeans => "kmeans",
            Self::Tight => "tight",
            Self::Spectral => "spectral",
        }
    }
}

impl fmt::Display for ClusterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClusterMethod {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.replace('-', "_");
        Self::all()
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(&needle))
            .ok_or_else(|| ClusterError::invalid_parameter(format!("unknown clustering method '{}'", s)))
    }
}

/// What a cluster's centroid is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representative {
    /// Copy-merged sum of member weights.
    #[default]
    Centroid,
    /// The member most similar to the mean.
    Nearest,
    /// Mean of member weights.
    Average,
    /// Root mean square of member weights.
    Rms,
    /// The member least similar to the mean.
    Furthest,
}

impl Representative {
    /// All modes.
    pub fn all() -> [Self; 5] {
        [
            Self::Centroid,
            Self::Nearest,
            Self::Average,
            Self::Rms,
            Self::Furthest,
        ]
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Centroid => "centroid",
            Self::Nearest => "nearest",
            Self::Average => "average",
            Self::Rms => "rms",
            Self::Furthest => "furthest",
        }
    }

    /// True for modes that promote a member instead of synthesizing a vector.
    #[inline]
    pub fn is_member(&self) -> bool {
        matches!(self, Self::Nearest | Self::Furthest)
    }
}

impl FromStr for Representative {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                ClusterError::invalid_parameter(format!("unknown representative mode '{}'", s))
            })
    }
}

/// Predicate deciding whether two seed labels conflict, i.e. name different
/// target clusters. Defaults to label inequality.
pub type SeedConflictFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

// =============================================================================
// Sub-parameter blocks
// =============================================================================

/// Knobs specific to tight clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TightParams {
    /// Resampling trials per k (B).
    pub trials: usize,
    /// Fraction of the working pool drawn per trial.
    pub sample_ratio: f64,
    /// Added to desired_clusters to get the starting k.
    pub k_offset: usize,
    /// Candidate groups kept per k (q).
    pub top_q: usize,
    /// Passes without convergence before alpha is relaxed.
    pub stall_limit: usize,
    /// Amount alpha grows on each relaxation.
    pub alpha_step: f64,
    /// Smallest group accepted as a tight cluster.
    pub min_cluster_size: usize,
    /// Hard cap on k passes.
    pub max_passes: usize,
}

impl Default for TightParams {
    fn default() -> Self {
        Self {
            trials: 10,
            sample_ratio: 0.66,
            k_offset: 5,
            top_q: 3,
            stall_limit: 10,
            alpha_step: 0.05,
            min_cluster_size: 2,
            max_passes: 200,
        }
    }
}

impl TightParams {
    fn validate(&self) -> Result<(), ClusterError> {
        if self.trials == 0 || self.trials > u16::MAX as usize {
            return Err(ClusterError::invalid_parameter(format!(
                "tight.trials must be in 1..={}, got {}",
                u16::MAX,
                self.trials
            )));
        }
        if !(self.sample_ratio > 0.0 && self.sample_ratio <= 1.0) {
            return Err(ClusterError::invalid_parameter(format!(
                "tight.sample_ratio must be in (0, 1], got {}",
                self.sample_ratio
            )));
        }
        if self.top_q == 0 {
            return Err(ClusterError::invalid_parameter("tight.top_q must be > 0"));
        }
        if self.min_cluster_size < 2 {
            return Err(ClusterError::invalid_parameter(format!(
                "tight.min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if !(self.alpha_step >= 0.0 && self.alpha_step.is_finite()) {
            return Err(ClusterError::invalid_parameter(format!(
                "tight.alpha_step must be finite and >= 0.0, got {}",
                self.alpha_step
            )));
        }
        Ok(())
    }
}

/// Knobs specific to spectral clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralParams {
    /// Rank of the neighbor whose distance sets a vector's local scale.
    pub neighbor_rank: usize,
    /// Power iteration cap per eigenvector.
    pub power_iterations: usize,
    /// Power iteration stops when the change norm drops below this.
    pub power_tolerance: f64,
    /// Lloyd iteration cap inside each embedded k-means run.
    pub kmeans_iterations: usize,
    /// Lloyd iteration stops when centroid movement drops below this.
    pub kmeans_tolerance: f64,
    /// Affinity between vectors carrying conflicting seeds.
    pub seed_repulsion: f64,
}

impl Default for SpectralParams {
    fn default() -> Self {
        Self {
            neighbor_rank: 7,
            power_iterations: 100,
            power_tolerance: 0.001,
            kmeans_iterations: 100,
            kmeans_tolerance: 1e-4,
            seed_repulsion: 1e-6,
        }
    }
}

impl SpectralParams {
    fn validate(&self) -> Result<(), ClusterError> {
        if self.neighbor_rank == 0 {
            return Err(ClusterError::invalid_parameter(
                "spectral.neighbor_rank must be >= 1",
            ));
        }
        if self.power_iterations == 0 || self.kmeans_iterations == 0 {
            return Err(ClusterError::invalid_parameter(
                "spectral iteration caps must be > 0",
            ));
        }
        if !(self.seed_repulsion >= 0.0 && self.seed_repulsion < 1.0) {
            return Err(ClusterError::invalid_parameter(format!(
                "spectral.seed_repulsion must be in [0, 1), got {}",
                self.seed_repulsion
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ClusteringParams
// =============================================================================

/// Parameter block for one clustering call.
///
/// # Example
///
/// ```
/// use term_cluster_core::clustering::{ClusterMethod, ClusteringParams, ThresholdList};
///
/// let params = ClusteringParams::default()
///     .with_method(ClusterMethod::Spectral)
///     .with_desired_clusters(3)
///     .with_thresholds(ThresholdList::constant(0.2));
/// assert!(params.validate().is_ok());
///
/// let invalid = ClusteringParams::default().with_backoff_step(0.0);
/// assert!(invalid.validate().is_err());
/// ```
#[derive(Clone)]
pub struct ClusteringParams {
    /// Strategy to run.
    pub method: ClusterMethod,
    /// Centroid policy.
    pub representative: Representative,
    /// Similarity policy.
    pub similarity: Similarity,
    /// Similarity floors.
    pub thresholds: ThresholdList,
    /// Requested cluster count.
    pub desired_clusters: usize,
    /// Iteration cap for k-means and spectral restarts.
    pub max_iterations: usize,
    /// Backoff step for threshold relaxation.
    pub backoff_step: f64,
    /// Bounded top-k neighbor cache per agglomerative cluster; 0 disables.
    pub cache_size: usize,
    /// Tight clustering co-membership relaxation.
    pub alpha: f64,
    /// Tight clustering Jaccard convergence bound.
    pub beta: f64,
    /// Merged frequency is the sum (true) or the max (false).
    pub sum_sizes: bool,
    /// Vectors beyond this count are truncated for O(n²) strategies.
    pub max_matrix_size: usize,
    /// Seed for every random draw.
    pub seed: u64,
    /// Seed conflict predicate; `None` means labels conflict when unequal.
    pub seed_conflict: Option<SeedConflictFn>,
    /// Tight clustering knobs.
    pub tight: TightParams,
    /// Spectral clustering knobs.
    pub spectral: SpectralParams,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            method: ClusterMethod::default(),
            representative: Representative::default(),
            similarity: Similarity::default(),
            thresholds: ThresholdList::default(),
            desired_clusters: DEFAULT_DESIRED_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            backoff_step: 0.05,
            cache_size: 0,
            alpha: 0.1,
            beta: 0.7,
            sum_sizes: true,
            max_matrix_size: DEFAULT_MAX_MATRIX_SIZE,
            seed: 42,
            seed_conflict: None,
            tight: TightParams::default(),
            spectral: SpectralParams::default(),
        }
    }
}

impl fmt::Debug for ClusteringParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteringParams")
            .field("method", &self.method)
            .field("representative", &self.representative)
            .field("similarity", &self.similarity)
            .field("thresholds", &self.thresholds)
            .field("desired_clusters", &self.desired_clusters)
            .field("max_iterations", &self.max_iterations)
            .field("backoff_step", &self.backoff_step)
            .field("cache_size", &self.cache_size)
            .field("alpha", &self.alpha)
            .field("beta", &self.beta)
            .field("sum_sizes", &self.sum_sizes)
            .field("max_matrix_size", &self.max_matrix_size)
            .field("seed", &self.seed)
            .field("seed_conflict", &self.seed_conflict.as_ref().map(|_| ".."))
            .field("tight", &self.tight)
            .field("spectral", &self.spectral)
            .finish()
    }
}

impl ClusteringParams {
    /// Set the strategy.
    #[must_use]
    pub fn with_method(mut self, method: ClusterMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the representative mode.
    #[must_use]
    pub fn with_representative(mut self, representative: Representative) -> Self {
        self.representative = representative;
        self
    }

    /// Set the similarity policy.
    #[must_use]
    pub fn with_similarity(mut self, similarity: impl Into<Similarity>) -> Self {
        self.similarity = similarity.into();
        self
    }

    /// Use one of the enumerated measures.
    #[must_use]
    pub fn with_measure(self, measure: SimilarityMeasure) -> Self {
        self.with_similarity(measure)
    }

    /// Set the threshold schedule.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ThresholdList) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the requested cluster count.
    #[must_use]
    pub fn with_desired_clusters(mut self, k: usize) -> Self {
        self.desired_clusters = k;
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Set the backoff step.
    #[must_use]
    pub fn with_backoff_step(mut self, step: f64) -> Self {
        self.backoff_step = step;
        self
    }

    /// Set the neighbor cache size; 0 disables caching.
    #[must_use]
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Set tight clustering alpha and beta.
    #[must_use]
    pub fn with_alpha_beta(mut self, alpha: f64, beta: f64) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }

    /// Choose sum (true) or max (false) for merged frequencies.
    #[must_use]
    pub fn with_sum_sizes(mut self, sum: bool) -> Self {
        self.sum_sizes = sum;
        self
    }

    /// Set the matrix cap.
    #[must_use]
    pub fn with_max_matrix_size(mut self, n: usize) -> Self {
        self.max_matrix_size = n;
        self
    }

    /// Set the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Install a seed conflict predicate.
    #[must_use]
    pub fn with_seed_conflict<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.seed_conflict = Some(Arc::new(f));
        self
    }

    /// Set tight clustering knobs.
    #[must_use]
    pub fn with_tight(mut self, tight: TightParams) -> Self {
        self.tight = tight;
        self
    }

    /// Set spectral clustering knobs.
    #[must_use]
    pub fn with_spectral(mut self, spectral: SpectralParams) -> Self {
        self.spectral = spectral;
        self
    }

    /// Whether two seed labels conflict.
    #[inline]
    pub fn seeds_conflict(&self, a: &str, b: &str) -> bool {
        match &self.seed_conflict {
            Some(f) => f(a, b),
            None => a != b,
        }
    }

    /// Merged frequency of two clusters.
    #[inline]
    pub fn merged_frequency(&self, a: f64, b: f64) -> f64 {
        if self.sum_sizes {
            a + b
        } else {
            a.max(b)
        }
    }

    /// Validate parameters.
    ///
    /// Fails fast with descriptive error messages.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` if:
    /// - desired_clusters == 0 or max_iterations == 0
    /// - backoff_step outside (0, 1]
    /// - alpha or beta outside [0, 1]
    /// - max_matrix_size < 2
    /// - the threshold list or a sub-parameter block is invalid
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.desired_clusters == 0 {
            return Err(ClusterError::invalid_parameter(
                "desired_clusters must be > 0",
            ));
        }
        if self.max_iterations == 0 {
            return Err(ClusterError::invalid_parameter("max_iterations must be > 0"));
        }
        if !(self.backoff_step > 0.0 && self.backoff_step <= 1.0) {
            return Err(ClusterError::invalid_parameter(format!(
                "backoff_step must be in (0, 1], got {}. Backoff would never relax the threshold.",
                self.backoff_step
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ClusterError::invalid_parameter(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(ClusterError::invalid_parameter(format!(
                "beta must be in [0, 1], got {}",
                self.beta
            )));
        }
        if self.max_matrix_size < 2 {
            return Err(ClusterError::invalid_parameter(format!(
                "max_matrix_size must be >= 2, got {}",
                self.max_matrix_size
            )));
        }
        self.thresholds.validate()?;
        self.tight.validate()?;
        self.spectral.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let params = ClusteringParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.desired_clusters, DEFAULT_DESIRED_CLUSTERS);
        assert_eq!(params.tight.trials, 10);
        assert_eq!(params.spectral.neighbor_rank, 7);
        println!("[PASS] test_defaults_validate - {:?}", params.method);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let cases = vec![
            ClusteringParams::default().with_desired_clusters(0),
            ClusteringParams::default().with_max_iterations(0),
            ClusteringParams::default().with_backoff_step(1.5),
            ClusteringParams::default().with_alpha_beta(-0.1, 0.5),
            ClusteringParams::default().with_alpha_beta(0.1, 1.1),
            ClusteringParams::default().with_max_matrix_size(1),
            ClusteringParams::default().with_tight(TightParams {
                sample_ratio: 0.0,
                ..TightParams::default()
            }),
            ClusteringParams::default().with_spectral(SpectralParams {
                neighbor_rank: 0,
                ..SpectralParams::default()
            }),
        ];
        for (i, params) in cases.iter().enumerate() {
            assert!(params.validate().is_err(), "case {} should be invalid", i);
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("group-average".parse::<ClusterMethod>().unwrap(), ClusterMethod::GroupAverage);
        assert_eq!("SPECTRAL".parse::<ClusterMethod>().unwrap(), ClusterMethod::Spectral);
        assert!("dbscan".parse::<ClusterMethod>().is_err());
        assert_eq!("rms".parse::<Representative>().unwrap(), Representative::Rms);
        assert!("median".parse::<Representative>().is_err());
    }

    #[test]
    fn test_seed_conflict_default_and_custom() {
        let params = ClusteringParams::default();
        assert!(params.seeds_conflict("A", "B"));
        assert!(!params.seeds_conflict("A", "A"));

        let params = params.with_seed_conflict(|a, b| a.to_lowercase() != b.to_lowercase());
        assert!(!params.seeds_conflict("Fin", "FIN"));
    }

    #[test]
    fn test_merged_frequency() {
        let params = ClusteringParams::default();
        assert_eq!(params.merged_frequency(3.0, 4.0), 7.0);
        let params = params.with_sum_sizes(false);
        assert_eq!(params.merged_frequency(3.0, 4.0), 4.0);
    }
}
