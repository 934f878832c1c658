//! Local store error types

use thiserror::Error;

/// Errors from the durable local store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed mutation queue entry: {0}")]
    QueueIntegrity(String),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
