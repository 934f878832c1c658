//! Client-side encryption: key derivation, field codec, DEK wrapping,
//! and the lock/unlock state machine.

pub mod codec;
pub mod errors;
pub mod kdf;
pub mod keys;
pub mod manager;
pub mod models;

pub use codec::{decrypt_string, encrypt_string};
pub use errors::{CryptoError, CryptoResult};
pub use kdf::{derive_kek, generate_dek, generate_salt, DEFAULT_KDF_ITERATIONS};
pub use keys::{sentinel_plaintext, unwrap_dek, wrap_dek};
pub use manager::KeyManager;
pub use models::{DeviceUnlockCache, EncBlob, EncryptionKey, LockState, WrappedKey};
