//! Error types for the infrastructure crate.

use thiserror::Error;

/// Errors that can occur while managing messaging infrastructure.
#[derive(Error, Debug)]
pub enum InfraError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Object not found in the cluster.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// A broker could not be reached for drain statistics.
    #[error("Broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// A broker answered with an unusable drain statistics response.
    #[error("Invalid drain statistics from {broker}: {reason}")]
    InvalidDrainStats {
        /// Broker cluster name.
        broker: String,
        /// What was wrong.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl InfraError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KubeApi(_) | Self::BrokerUnreachable(_) | Self::InvalidDrainStats { .. }
        )
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::ObjectNotFound(_) => 404,
            Self::Config(_) => 500,
            Self::KubeApi(_) | Self::BrokerUnreachable(_) | Self::InvalidDrainStats { .. } => 503,
        }
    }
}

/// A specialized Result type for infrastructure operations.
pub type Result<T> = std::result::Result<T, InfraError>;
