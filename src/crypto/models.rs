//! Key material and ciphertext data models

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One AES-GCM ciphertext plus its 96-bit IV, both base64-encoded.
///
/// A field is "unset" iff its blob is absent — never an empty ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncBlob {
    /// Ciphertext with appended authentication tag (base64)
    pub ct: String,
    /// 96-bit IV used for this single operation (base64)
    pub iv: String,
}

/// A DEK wrapped under some key-encrypting key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    /// Wrapped DEK bytes (base64)
    pub wrapped_dek_b64: String,
    /// IV used for the wrap operation (base64)
    pub wrapped_iv_b64: String,
}

/// Device-local unlock cache.
///
/// Lets subsequent app opens skip the passphrase prompt: the DEK is
/// wrapped a second time under a random device-bound key that never
/// leaves local storage. The sentinel ciphertext proves a locally
/// unwrapped DEK belongs to the current account before it is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUnlockCache {
    /// Device-bound wrap key (base64, local storage only)
    pub local_wrap_key_b64: String,
    /// DEK wrapped under the device key (base64)
    pub wrapped_dek_b64: String,
    /// IV for the device wrap (base64)
    pub wrapped_dek_iv_b64: String,
    /// Encrypted `"sentinel:<externalId>"` under the DEK
    pub sentinel: EncBlob,
}

/// Symmetric 256-bit key with secure memory handling
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// Create a new key from raw bytes
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Current lock state of the key manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// No DEK in memory; unlock required before any field access
    Locked,
    /// An unlock attempt is in flight
    Unlocking,
    /// DEK held in memory; encrypt/decrypt available
    Unlocked,
}
