//! Passphrase key derivation and key generation

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use super::errors::{CryptoError, CryptoResult};
use super::models::EncryptionKey;

/// Salt size in bytes
const SALT_SIZE: usize = 16;

/// Default PBKDF2 iteration count for new accounts
pub const DEFAULT_KDF_ITERATIONS: u32 = 310_000;

/// Generate a random salt for key derivation
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Generate a fresh random 256-bit data-encrypting key
pub fn generate_dek() -> EncryptionKey {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    EncryptionKey::new(key)
}

/// Derive a key-encrypting key from a passphrase using PBKDF2-HMAC-SHA256.
///
/// Deterministic given identical passphrase, salt and iteration count.
pub fn derive_kek(passphrase: &str, salt_b64: &str, iterations: u32) -> CryptoResult<EncryptionKey> {
    if iterations == 0 {
        return Err(CryptoError::KeyDerivationFailed(
            "iteration count must be non-zero".to_string(),
        ));
    }

    let salt = BASE64
        .decode(salt_b64)
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("invalid salt: {}", e)))?;
    if salt.is_empty() {
        return Err(CryptoError::KeyDerivationFailed("empty salt".to_string()));
    }

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, iterations, &mut key);
    Ok(EncryptionKey::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keep test iteration counts small; correctness does not depend on work factor.
    const TEST_ITERATIONS: u32 = 1000;

    #[test]
    fn test_salt_generation() {
        let salt1 = generate_salt();
        let salt2 = generate_salt();
        assert_ne!(salt1, salt2);
        assert_eq!(BASE64.decode(&salt1).unwrap().len(), SALT_SIZE);
    }

    #[test]
    fn test_derive_kek_deterministic() {
        let salt = generate_salt();
        let k1 = derive_kek("correct horse", &salt, TEST_ITERATIONS).unwrap();
        let k2 = derive_kek("correct horse", &salt, TEST_ITERATIONS).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_kek_passphrase_sensitivity() {
        let salt = generate_salt();
        let k1 = derive_kek("passphrase one", &salt, TEST_ITERATIONS).unwrap();
        let k2 = derive_kek("passphrase two", &salt, TEST_ITERATIONS).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_kek_salt_sensitivity() {
        let k1 = derive_kek("passphrase", &generate_salt(), TEST_ITERATIONS).unwrap();
        let k2 = derive_kek("passphrase", &generate_salt(), TEST_ITERATIONS).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_derive_kek_rejects_bad_inputs() {
        assert!(derive_kek("p", "not-base64!!!", TEST_ITERATIONS).is_err());
        assert!(derive_kek("p", &generate_salt(), 0).is_err());
    }

    #[test]
    fn test_generate_dek_unique() {
        let d1 = generate_dek();
        let d2 = generate_dek();
        assert_ne!(d1.as_bytes(), d2.as_bytes());
    }
}
