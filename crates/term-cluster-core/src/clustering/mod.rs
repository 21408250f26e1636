//! Clustering of term vectors.
//!
//! # Strategies
//!
//! - [`ClusterMethod::Incremental`] / [`ClusterMethod::GroupAverage`]: one
//!   assignment pass per vector against the existing clusters.
//! - [`ClusterMethod::Agglomerative`]: bottom-up merging of the closest pair
//!   under a relaxing threshold.
//! - [`ClusterMethod::KMeans`]: plain k-means, seed labels pinned.
//! - [`ClusterMethod::Tight`]: resampled co-membership voting; keeps only
//!   high-confidence groups.
//! - [`ClusterMethod::Spectral`]: eigenspace embedding plus k-means.
//!
//! Every strategy writes into a [`ClusterRegistry`]. After a strategy runs,
//! clusters linked by compatible seed labels are merged.

mod agglomerative;
mod cancel;
mod equivalence;
mod incremental;
mod kmeans;
mod params;
mod record;
mod registry;
mod sampling;
mod session;
mod spectral;
mod threshold;
mod tight;

pub use agglomerative::{agglomerate, AgglomerativeOutcome};
pub use cancel::CancellationToken;
pub use equivalence::{keep_most_central, merge_equivalent, trim};
pub use incremental::{assign, AssignOutcome};
pub use kmeans::{kmeans, KMeansInit, KMeansOutcome};
pub use params::{
    ClusterMethod, ClusteringParams, Representative, SeedConflictFn, SpectralParams, TightParams,
    DEFAULT_DESIRED_CLUSTERS, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_MATRIX_SIZE,
};
pub use record::ClusterRecord;
pub use registry::{ClusterRegistry, DestroyHook, GENERATED_PREFIX};
pub use sampling::{rng_from_seed, sample_size, sample_without_replacement};
pub use session::{
    assign_labels, cluster, ClusterOptions, ClusterOutput, ClusteringSession, OutputCluster, RunReport,
};
pub use spectral::{affinity_matrix, normalize_symmetric, spectral_cluster, SpectralOutcome, SquareMatrix};
pub use threshold::{Backoff, ThresholdEntry, ThresholdList, BACKOFF_FLOOR};
pub use tight::{tight_cluster, TightOutcome};
