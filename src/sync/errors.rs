//! Sync error types

use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;

/// Errors from the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported remote schema version {0}")]
    UnsupportedSchema(u32),

    #[error("Remote object is not a {expected} envelope")]
    EnvelopeKind { expected: &'static str },

    /// A drain stopped at a failing item. Everything from the failing
    /// item onward remains enqueued for the next attempt.
    #[error("Sync aborted after {completed} change(s); {remaining} left pending: {source}")]
    DrainAborted {
        completed: usize,
        remaining: usize,
        #[source]
        source: Box<SyncError>,
    },
}

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
