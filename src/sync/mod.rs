//! Offline-first synchronization against an opaque blob store.

pub mod engine;
pub mod envelope;
pub mod errors;
pub mod merge;

pub use engine::{SyncEngine, SyncOutcome};
pub use envelope::{open, seal, EnvelopeKind, SCHEMA_VERSION};
pub use errors::{SyncError, SyncResult};
pub use merge::{merge_data, Mergeable};
