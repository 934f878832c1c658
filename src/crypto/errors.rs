//! Crypto error types

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Session is locked. Unlock with passphrase first.")]
    Locked,

    #[error("Encryption has not been set up for this account")]
    NotInitialized,

    #[error("Unlock already in progress")]
    UnlockInProgress,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Sentinel does not match this account")]
    SentinelMismatch,

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
