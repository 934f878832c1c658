//! Abstract remote object store.
//!
//! The sync engine consumes only opaque list/get/put/delete over named
//! containers — no transactions, no change feed, no conditional writes.
//! Wire-level details live behind implementations of [`RemoteStore`].

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use fs::FsRemote;
pub use memory::MemoryRemote;

/// Errors from the remote store
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Offline or the backend is unreachable
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The object does not exist. Benign for delete and for updates of
    /// entities already removed elsewhere.
    #[error("Remote object not found: {0}")]
    NotFound(String),

    #[error("Remote backend error: {0}")]
    Backend(String),
}

/// Result type alias for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Listing entry for one remote object
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
}

/// The capabilities the engine requires, nothing more.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Return the id of the named container, creating it if absent
    async fn find_or_create_container(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> RemoteResult<String>;

    /// List the objects in a container
    async fn list_objects(&self, container_id: &str) -> RemoteResult<Vec<RemoteObject>>;

    /// Fetch one object's bytes
    async fn get_object_bytes(&self, object_id: &str) -> RemoteResult<Vec<u8>>;

    /// Store bytes as a new object, returning its id. Overwrite of an
    /// existing name is not assumed; callers delete first.
    async fn put_object(
        &self,
        container_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> RemoteResult<String>;

    /// Delete one object
    async fn delete_object(&self, object_id: &str) -> RemoteResult<()>;
}
