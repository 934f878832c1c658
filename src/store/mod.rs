//! Durable local persistence: snapshots, freshness, mutation queue.

pub mod errors;
pub mod kv;
pub mod local;
pub mod queue;

pub use errors::{StoreError, StoreResult};
pub use kv::{FileKvStore, KeyValueStore, MemoryKvStore};
pub use local::LocalStore;
pub use queue::{Mutation, MutationQueue, MutationQueueItem};
