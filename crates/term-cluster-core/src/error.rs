//! Error types for term clustering operations.

use thiserror::Error;

/// Errors that can occur during clustering operations.
///
/// Only [`ClusterError::InvalidParameter`] and the configuration variants
/// ever escape [`crate::cluster`]. Resource exhaustion is raised inside a
/// strategy and absorbed by the orchestrator into the run report.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Not enough vectors for the requested operation.
    #[error("Insufficient data: required {required}, actual {actual}")]
    InsufficientData {
        /// Minimum required vectors
        required: usize,
        /// Actual vectors provided
        actual: usize,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of what's wrong with the parameter
        message: String,
    },

    /// A matrix or queue allocation could not be satisfied.
    #[error("Out of memory allocating {what} ({requested} elements)")]
    OutOfMemory {
        /// Name of the structure being allocated
        what: &'static str,
        /// Number of elements requested
        requested: usize,
    },

    /// Cluster name not present in the registry.
    #[error("Unknown cluster: {name}")]
    UnknownCluster {
        /// The missing cluster name
        name: String,
    },

    /// Cluster name already present in the registry.
    #[error("Duplicate cluster: {name}")]
    DuplicateCluster {
        /// The conflicting cluster name
        name: String,
    },

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    /// Create an InsufficientData error.
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create an OutOfMemory error.
    pub fn out_of_memory(what: &'static str, requested: usize) -> Self {
        Self::OutOfMemory { what, requested }
    }

    /// Create an UnknownCluster error.
    pub fn unknown_cluster(name: impl Into<String>) -> Self {
        Self::UnknownCluster { name: name.into() }
    }

    /// True for errors a strategy recovers from by returning partial results.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for ClusterError {
    fn from(err: config::ConfigError) -> Self {
        ClusterError::Config(err.to_string())
    }
}

/// Result type alias for clustering operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Reserve room for `len` elements, mapping allocator refusal to
/// [`ClusterError::OutOfMemory`].
pub(crate) fn try_alloc<T: Clone>(what: &'static str, len: usize, fill: T) -> ClusterResult<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ClusterError::out_of_memory(what, len))?;
    buf.resize(len, fill);
    Ok(buf)
}
