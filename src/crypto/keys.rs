//! DEK wrapping and sentinel construction

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::codec::{decrypt_bytes, encrypt_bytes};
use super::errors::{CryptoError, CryptoResult};
use super::models::{EncryptionKey, WrappedKey};

/// Wrap a DEK under a key-encrypting key.
///
/// Exports the DEK's raw bytes and AES-GCM-encrypts them with a fresh
/// random IV.
pub fn wrap_dek(dek: &EncryptionKey, kek: &EncryptionKey) -> CryptoResult<WrappedKey> {
    let (wrapped, iv) = encrypt_bytes(kek, dek.as_bytes())?;
    Ok(WrappedKey {
        wrapped_dek_b64: BASE64.encode(wrapped),
        wrapped_iv_b64: BASE64.encode(iv),
    })
}

/// Unwrap a DEK.
///
/// Fails with `DecryptionFailed` if the KEK is wrong or the wrapped data
/// is corrupt.
pub fn unwrap_dek(wrapped_b64: &str, iv_b64: &str, kek: &EncryptionKey) -> CryptoResult<EncryptionKey> {
    let wrapped = BASE64.decode(wrapped_b64)?;
    let iv = BASE64.decode(iv_b64)?;
    let raw = decrypt_bytes(kek, &wrapped, &iv)?;

    let key: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
        CryptoError::DecryptionFailed(format!("unwrapped key has wrong length: {}", raw.len()))
    })?;
    Ok(EncryptionKey::new(key))
}

/// The plaintext a device-cache sentinel must decrypt to for the given
/// account
pub fn sentinel_plaintext(external_id: &str) -> String {
    format!("sentinel:{}", external_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::codec::{decrypt_string, encrypt_string};
    use crate::crypto::kdf::{derive_kek, generate_dek, generate_salt};

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let salt = generate_salt();
        let kek = derive_kek("passphrase", &salt, 1000).unwrap();
        let dek = generate_dek();

        let wrapped = wrap_dek(&dek, &kek).unwrap();
        let unwrapped = unwrap_dek(&wrapped.wrapped_dek_b64, &wrapped.wrapped_iv_b64, &kek).unwrap();
        assert_eq!(dek.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_unwrapped_dek_behaves_identically() {
        let salt = generate_salt();
        let kek = derive_kek("passphrase", &salt, 1000).unwrap();
        let dek = generate_dek();

        let wrapped = wrap_dek(&dek, &kek).unwrap();
        let kek_again = derive_kek("passphrase", &salt, 1000).unwrap();
        let unwrapped =
            unwrap_dek(&wrapped.wrapped_dek_b64, &wrapped.wrapped_iv_b64, &kek_again).unwrap();

        let blob = encrypt_string(&dek, "cross-key roundtrip").unwrap();
        assert_eq!(decrypt_string(&unwrapped, &blob).unwrap(), "cross-key roundtrip");
    }

    #[test]
    fn test_unwrap_with_wrong_kek_fails() {
        let salt = generate_salt();
        let kek = derive_kek("right", &salt, 1000).unwrap();
        let wrong = derive_kek("wrong", &salt, 1000).unwrap();
        let dek = generate_dek();

        let wrapped = wrap_dek(&dek, &kek).unwrap();
        assert!(matches!(
            unwrap_dek(&wrapped.wrapped_dek_b64, &wrapped.wrapped_iv_b64, &wrong),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }
}
