//! Configuration file loading.

use std::fs;

use tempfile::TempDir;
use term_cluster_core::clustering::ClusterMethod;
use term_cluster_core::vector::SimilarityMeasure;
use term_cluster_core::{ClusterError, Config};

const SAMPLE: &str = r#"
[logging]
level = "debug"
format = "compact"

[clustering]
method = "spectral"
representative = "nearest"
measure = "jaccard"
desired_clusters = 4
seed = 7

[[clustering.thresholds]]
min_frequency = 0.0
similarity = 0.5

[[clustering.thresholds]]
min_frequency = 100.0
similarity = 0.2

[clustering.spectral]
neighbor_rank = 3
"#;

#[test]
fn test_from_file_builds_params() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cluster.toml");
    fs::write(&path, SAMPLE).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "compact");

    let params = config.clustering.to_params().unwrap();
    assert_eq!(params.method, ClusterMethod::Spectral);
    assert_eq!(params.desired_clusters, 4);
    assert_eq!(params.seed, 7);
    assert_eq!(params.spectral.neighbor_rank, 3);
    assert_eq!(params.spectral.power_iterations, 100);
    assert_eq!(params.thresholds.threshold(3.0, 500.0, 1.0), 0.5);
    assert_eq!(params.thresholds.threshold(300.0, 500.0, 1.0), 0.2);
    assert_eq!(config.clustering.measure, SimilarityMeasure::Jaccard);
    println!("[PASS] test_from_file_builds_params - {:?}", params.method);
}

#[test]
fn test_from_file_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[clustering]\nalpha = 3.0\n").unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(err, ClusterError::InvalidParameter { .. }), "got {:?}", err);
    assert!(!err.is_recoverable());
}

#[test]
fn test_from_file_missing_or_malformed() {
    let dir = TempDir::new().unwrap();

    let missing = Config::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(missing, Err(ClusterError::Config(_))));

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[clustering\nmethod = ").unwrap();
    assert!(matches!(Config::from_file(&path), Err(ClusterError::Config(_))));
}

#[test]
fn test_written_defaults_load_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("defaults.toml");
    fs::write(&path, Config::default().to_toml().unwrap()).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded, Config::default());
}
