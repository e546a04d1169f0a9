use thiserror::Error;

/// Errors raised at the crate's fallible boundaries.
///
/// The prediction, learning and reconciliation engines never fail; these
/// variants cover configuration, stored labels and persistence.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid bucket label: {0}")]
    InvalidBucketLabel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;
