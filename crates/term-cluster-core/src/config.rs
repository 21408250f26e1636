//! Configuration management for term clustering.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clustering::{
    ClusterMethod, ClusteringParams, Representative, SpectralParams, ThresholdEntry, ThresholdList, TightParams,
};
use crate::error::{ClusterError, ClusterResult};
use crate::vector::SimilarityMeasure;

/// Environment variable selecting the environment-specific config file.
pub const ENV_SELECTOR: &str = "TERM_CLUSTER_ENV";

/// Prefix of environment overrides, e.g. `TERM_CLUSTER__CLUSTERING__SEED=7`.
pub const ENV_PREFIX: &str = "TERM_CLUSTER";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub clustering: ClusteringConfig,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order:
    /// 1. config/default.toml (base settings)
    /// 2. config/{TERM_CLUSTER_ENV}.toml (environment-specific)
    /// 3. Environment variables with TERM_CLUSTER__ prefix
    pub fn load() -> ClusterResult<Self> {
        let env = std::env::var(ENV_SELECTOR).unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ClusterResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ClusterError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> ClusterResult<()> {
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ClusterError::Config(format!(
                "logging.level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.logging.level
            )));
        }
        self.clustering.to_params()?;
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> ClusterResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClusterError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `compact`.
    pub format: String,
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
        }
    }
}

/// Serializable mirror of [`ClusteringParams`].
///
/// Closures (custom similarity, seed conflict predicate) cannot be expressed
/// in a file; callers attach them to the params returned by
/// [`ClusteringConfig::to_params`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    pub method: ClusterMethod,
    pub representative: Representative,
    pub measure: SimilarityMeasure,
    pub desired_clusters: usize,
    pub max_iterations: usize,
    pub backoff_step: f64,
    pub cache_size: usize,
    pub alpha: f64,
    pub beta: f64,
    pub sum_sizes: bool,
    pub max_matrix_size: usize,
    pub seed: u64,
    pub thresholds: Vec<ThresholdEntry>,
    pub tight: TightParams,
    pub spectral: SpectralParams,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let params = ClusteringParams::default();
        Self {
            method: params.method,
            representative: params.representative,
            measure: SimilarityMeasure::default(),
            desired_clusters: params.desired_clusters,
            max_iterations: params.max_iterations,
            backoff_step: params.backoff_step,
            cache_size: params.cache_size,
            alpha: params.alpha,
            beta: params.beta,
            sum_sizes: params.sum_sizes,
            max_matrix_size: params.max_matrix_size,
            seed: params.seed,
            thresholds: params.thresholds.entries().to_vec(),
            tight: params.tight,
            spectral: params.spectral,
        }
    }
}

impl ClusteringConfig {
    /// Build validated parameters.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` if any value is out of range.
    pub fn to_params(&self) -> ClusterResult<ClusteringParams> {
        let thresholds = ThresholdList::from_entries(
            self.thresholds
                .iter()
                .map(|e| (e.min_frequency, e.similarity))
                .collect(),
        )?;
        let params = ClusteringParams::default()
            .with_method(self.method)
            .with_representative(self.representative)
            .with_measure(self.measure)
            .with_thresholds(thresholds)
            .with_desired_clusters(self.desired_clusters)
            .with_max_iterations(self.max_iterations)
            .with_backoff_step(self.backoff_step)
            .with_cache_size(self.cache_size)
            .with_alpha_beta(self.alpha, self.beta)
            .with_sum_sizes(self.sum_sizes)
            .with_max_matrix_size(self.max_matrix_size)
            .with_seed(self.seed)
            .with_tight(self.tight.clone())
            .with_spectral(self.spectral.clone());
        params.validate()?;
        Ok(params)
    }
}
