//! Privacy-focused notes engine.
//!
//! End-to-end encryption key management (passphrase-derived key
//! wrapping, per-field ciphertext) plus an offline-first sync engine
//! that reconciles a durable local store against a remote blob store
//! offering only opaque list/get/put/delete.

pub mod config;
pub mod crypto;
pub mod events;
pub mod models;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;

pub use config::EngineConfig;
pub use crypto::{CryptoError, EncBlob, KeyManager, LockState};
pub use events::{ChangeEvent, EventBus, Subscription};
pub use models::{Note, Tag, UserRecord};
pub use remote::{RemoteError, RemoteObject, RemoteStore};
pub use session::{
    DecryptedNote, DecryptedTag, NoteDraft, SessionController, SessionError, TagDraft,
};
pub use store::{KeyValueStore, LocalStore, Mutation, StoreError};
pub use sync::{SyncEngine, SyncError, SyncOutcome};
