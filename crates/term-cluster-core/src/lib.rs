//! Term Cluster Core Library
//!
//! Groups sparse weighted term vectors into clusters under a pluggable
//! similarity measure.
//!
//! # Architecture
//!
//! This crate defines:
//! - Term vectors and similarity measures (`TermVector`, `SimilarityMeasure`)
//! - Threshold schedules with backoff (`ThresholdList`, `Backoff`)
//! - The cluster registry and records (`ClusterRegistry`, `ClusterRecord`)
//! - Strategies: incremental, group average, agglomerative, k-means, tight, spectral
//! - Post-processing: seed equivalence merging and trimming
//! - Error types and configuration structures
//!
//! # Example
//!
//! ```
//! use term_cluster_core::{cluster, ClusterMethod, ClusterOptions, ClusteringParams, TermVector};
//!
//! let vectors = vec![
//!     TermVector::from_pairs("river", 5.0, vec![(0, 1.0), (1, 0.8)]),
//!     TermVector::from_pairs("stream", 3.0, vec![(0, 0.9), (1, 1.0)]),
//!     TermVector::from_pairs("loan", 7.0, vec![(5, 1.0), (6, 0.7)]),
//! ];
//! let params = ClusteringParams::default()
//!     .with_method(ClusterMethod::GroupAverage)
//!     .with_desired_clusters(2);
//!
//! let output = cluster(&vectors, &params, &ClusterOptions::default()).unwrap();
//! assert_eq!(output.clusters.len(), 2);
//! assert!(output.clusters.iter().any(|c| c.keys == ["river", "stream"]));
//! ```

pub mod clustering;
pub mod config;
pub mod error;
pub mod vector;

// Re-exports for convenience
pub use clustering::{
    assign_labels, cluster, CancellationToken, ClusterMethod, ClusterOptions, ClusterOutput, ClusterRecord,
    ClusterRegistry, ClusteringParams, ClusteringSession, OutputCluster, Representative, RunReport, ThresholdList,
};
pub use config::Config;
pub use error::{ClusterError, ClusterResult};
pub use vector::{Similarity, SimilarityMeasure, SparseWeights, TermVector};
