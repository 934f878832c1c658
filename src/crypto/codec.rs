//! Per-field encryption and decryption

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use super::errors::{CryptoError, CryptoResult};
use super::models::{EncBlob, EncryptionKey};

/// IV size in bytes for AES-GCM (96 bits)
pub const IV_SIZE: usize = 12;

/// Generate a random IV for one encryption operation
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt bytes using AES-256-GCM with a fresh random IV
pub fn encrypt_bytes(key: &EncryptionKey, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, [u8; IV_SIZE])> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let iv_bytes = generate_iv();
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok((ciphertext, iv_bytes))
}

/// Decrypt bytes using AES-256-GCM.
///
/// Fails on authentication-tag mismatch (wrong key or corrupted
/// ciphertext) — never returns garbage.
pub fn decrypt_bytes(key: &EncryptionKey, ciphertext: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "Invalid IV size: expected {}, got {}",
            IV_SIZE,
            iv.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("authentication failed".to_string()))
}

/// Encrypt a string field into an [`EncBlob`].
///
/// Every field is encrypted independently with its own IV, so partial
/// corruption of one field never prevents decrypting the others.
pub fn encrypt_string(key: &EncryptionKey, plaintext: &str) -> CryptoResult<EncBlob> {
    let (ciphertext, iv) = encrypt_bytes(key, plaintext.as_bytes())?;
    Ok(EncBlob {
        ct: BASE64.encode(ciphertext),
        iv: BASE64.encode(iv),
    })
}

/// Decrypt a string field from an [`EncBlob`]
pub fn decrypt_string(key: &EncryptionKey, blob: &EncBlob) -> CryptoResult<String> {
    let ciphertext = BASE64.decode(&blob.ct)?;
    let iv = BASE64.decode(&blob.iv)?;
    let plaintext = decrypt_bytes(key, &ciphertext, &iv)?;
    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::generate_dek;

    #[test]
    fn test_string_roundtrip() {
        let key = generate_dek();
        let blob = encrypt_string(&key, "Hello, World!").unwrap();
        assert_eq!(decrypt_string(&key, &blob).unwrap(), "Hello, World!");
    }

    #[test]
    fn test_empty_string_roundtrip() {
        let key = generate_dek();
        let blob = encrypt_string(&key, "").unwrap();
        assert_eq!(decrypt_string(&key, &blob).unwrap(), "");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = generate_dek();
        let b1 = encrypt_string(&key, "same plaintext").unwrap();
        let b2 = encrypt_string(&key, "same plaintext").unwrap();
        assert_ne!(b1.iv, b2.iv);
        assert_ne!(b1.ct, b2.ct);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = generate_dek();
        let other = generate_dek();
        let blob = encrypt_string(&key, "secret").unwrap();
        assert!(matches!(
            decrypt_string(&other, &blob),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let key = generate_dek();
        let mut blob = encrypt_string(&key, "secret").unwrap();
        let mut raw = BASE64.decode(&blob.ct).unwrap();
        raw[0] ^= 0xff;
        blob.ct = BASE64.encode(raw);
        assert!(matches!(
            decrypt_string(&key, &blob),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_corrupted_field_is_isolated() {
        let key = generate_dek();
        let good = encrypt_string(&key, "title").unwrap();
        let mut bad = encrypt_string(&key, "content").unwrap();
        bad.iv = BASE64.encode([0u8; IV_SIZE]);

        // The corrupted field fails alone; the other still decrypts.
        assert!(decrypt_string(&key, &bad).is_err());
        assert_eq!(decrypt_string(&key, &good).unwrap(), "title");
    }
}
