//! Key manager: unlock flows and the lock state machine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::models::UserRecord;

use super::codec::{decrypt_string, encrypt_string};
use super::errors::{CryptoError, CryptoResult};
use super::kdf::{derive_kek, generate_dek, generate_salt};
use super::keys::{sentinel_plaintext, unwrap_dek, wrap_dek};
use super::models::{DeviceUnlockCache, EncryptionKey, LockState};

/// Holds the unwrapped DEK while the session is unlocked.
///
/// Every persisted form of the DEK is wrapped — under the
/// passphrase-derived KEK in the user record, under a device-bound key
/// in the local unlock cache. Only this struct ever sees it raw, and
/// only in volatile memory.
pub struct KeyManager {
    dek: RwLock<Option<EncryptionKey>>,
    state: RwLock<LockState>,
    /// Set by `lock()`: the next unlock must take the passphrase path,
    /// bypassing the device cache.
    require_passphrase: AtomicBool,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyManager {
    pub fn new() -> Self {
        Self {
            dek: RwLock::new(None),
            state: RwLock::new(LockState::Locked),
            require_passphrase: AtomicBool::new(false),
        }
    }

    /// Current lock state
    pub fn state(&self) -> LockState {
        *self.state.read().unwrap()
    }

    /// Whether the device-cache unlock path is currently allowed
    pub fn device_unlock_allowed(&self) -> bool {
        !self.require_passphrase.load(Ordering::SeqCst)
    }

    /// Get the unwrapped DEK, or `Locked` if none is held
    pub fn dek(&self) -> CryptoResult<EncryptionKey> {
        self.dek
            .read()
            .unwrap()
            .clone()
            .ok_or(CryptoError::Locked)
    }

    /// First-time encryption setup.
    ///
    /// Generates salt, iterations and DEK; wraps the DEK under the
    /// passphrase-KEK and attaches the material to the user record;
    /// wraps the DEK a second time under a fresh device-bound key and
    /// returns the device unlock cache for local persistence. Leaves
    /// the manager unlocked.
    pub fn initialize(
        &self,
        user: &mut UserRecord,
        passphrase: &str,
        iterations: u32,
    ) -> CryptoResult<DeviceUnlockCache> {
        let salt = generate_salt();
        let dek = generate_dek();

        let kek = derive_kek(passphrase, &salt, iterations)?;
        let wrapped = wrap_dek(&dek, &kek)?;

        user.enc_salt_b64 = Some(salt);
        user.enc_iterations = Some(iterations);
        user.wrapped_dek_b64 = Some(wrapped.wrapped_dek_b64);
        user.wrapped_dek_iv_b64 = Some(wrapped.wrapped_iv_b64);

        let cache = self.build_device_cache(&dek, &user.external_id)?;

        *self.dek.write().unwrap() = Some(dek);
        *self.state.write().unwrap() = LockState::Unlocked;
        self.require_passphrase.store(false, Ordering::SeqCst);

        Ok(cache)
    }

    /// Unlock with the stated priority: device cache first (unless a
    /// prior `lock()` forces the passphrase path), then passphrase.
    ///
    /// Returns a refreshed device cache to persist when the passphrase
    /// path was taken, `None` when the device cache satisfied the
    /// unlock. Failures return the manager to `Locked` and are
    /// retryable.
    pub fn unlock(
        &self,
        user: &UserRecord,
        cache: Option<&DeviceUnlockCache>,
        passphrase: Option<&str>,
    ) -> CryptoResult<Option<DeviceUnlockCache>> {
        {
            let mut state = self.state.write().unwrap();
            match *state {
                LockState::Unlocked => return Ok(None),
                LockState::Unlocking => return Err(CryptoError::UnlockInProgress),
                LockState::Locked => *state = LockState::Unlocking,
            }
        }

        let result = self.unlock_inner(user, cache, passphrase);
        match &result {
            Ok(_) => {
                *self.state.write().unwrap() = LockState::Unlocked;
                self.require_passphrase.store(false, Ordering::SeqCst);
            }
            Err(_) => {
                *self.state.write().unwrap() = LockState::Locked;
            }
        }
        result
    }

    fn unlock_inner(
        &self,
        user: &UserRecord,
        cache: Option<&DeviceUnlockCache>,
        passphrase: Option<&str>,
    ) -> CryptoResult<Option<DeviceUnlockCache>> {
        // 1. Device-local path. Any failure falls through silently to
        //    the passphrase path — including a sentinel that decrypts
        //    to the wrong plaintext.
        if self.device_unlock_allowed() {
            if let Some(cache) = cache {
                match self.try_device_unlock(user, cache) {
                    Ok(dek) => {
                        *self.dek.write().unwrap() = Some(dek);
                        return Ok(None);
                    }
                    Err(e) => {
                        log::debug!("Unlock: device cache path failed ({}), falling back to passphrase", e);
                    }
                }
            }
        }

        // 2. Passphrase path
        let passphrase = passphrase.ok_or(CryptoError::Locked)?;
        let salt = user.enc_salt_b64.as_deref().ok_or(CryptoError::NotInitialized)?;
        let iterations = user.enc_iterations.ok_or(CryptoError::NotInitialized)?;
        let wrapped = user.wrapped_dek_b64.as_deref().ok_or(CryptoError::NotInitialized)?;
        let wrapped_iv = user.wrapped_dek_iv_b64.as_deref().ok_or(CryptoError::NotInitialized)?;

        let kek = derive_kek(passphrase, salt, iterations)?;
        let dek = unwrap_dek(wrapped, wrapped_iv, &kek)?;

        // The unwrap is authenticated, so a wrong KEK already failed
        // above. Reconstruct the sentinel for the fresh device cache —
        // never trust an existing cache here, it may belong to another
        // account.
        let new_cache = self.build_device_cache(&dek, &user.external_id)?;
        self.verify_sentinel(&dek, &new_cache.sentinel, &user.external_id)?;

        *self.dek.write().unwrap() = Some(dek);
        Ok(Some(new_cache))
    }

    /// Attempt the device-local unlock: import the local wrap key,
    /// unwrap the DEK, and verify the sentinel before trusting it.
    fn try_device_unlock(
        &self,
        user: &UserRecord,
        cache: &DeviceUnlockCache,
    ) -> CryptoResult<EncryptionKey> {
        let raw = BASE64.decode(&cache.local_wrap_key_b64)?;
        let key: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed("bad device wrap key length".to_string()))?;
        let device_key = EncryptionKey::new(key);

        let dek = unwrap_dek(&cache.wrapped_dek_b64, &cache.wrapped_dek_iv_b64, &device_key)?;
        self.verify_sentinel(&dek, &cache.sentinel, &user.external_id)?;
        Ok(dek)
    }

    /// Decrypt the sentinel with a candidate DEK and compare it against
    /// the expected plaintext in constant time.
    fn verify_sentinel(
        &self,
        dek: &EncryptionKey,
        sentinel: &super::models::EncBlob,
        external_id: &str,
    ) -> CryptoResult<()> {
        let decrypted = decrypt_string(dek, sentinel)?;
        let expected = sentinel_plaintext(external_id);
        if decrypted.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(())
        } else {
            Err(CryptoError::SentinelMismatch)
        }
    }

    /// Build a device unlock cache: fresh device wrap key, DEK wrapped
    /// under it, sentinel ciphertext for the account.
    fn build_device_cache(
        &self,
        dek: &EncryptionKey,
        external_id: &str,
    ) -> CryptoResult<DeviceUnlockCache> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let device_key = EncryptionKey::new(raw);

        let wrapped = wrap_dek(dek, &device_key)?;
        let sentinel = encrypt_string(dek, &sentinel_plaintext(external_id))?;

        Ok(DeviceUnlockCache {
            local_wrap_key_b64: BASE64.encode(device_key.as_bytes()),
            wrapped_dek_b64: wrapped.wrapped_dek_b64,
            wrapped_dek_iv_b64: wrapped.wrapped_iv_b64,
            sentinel,
        })
    }

    /// Lock: clear the in-memory DEK and force the next unlock through
    /// the passphrase path. The device cache is intentionally kept —
    /// lock hides decrypted data, it does not forget this device.
    pub fn lock(&self) {
        *self.dek.write().unwrap() = None;
        *self.state.write().unwrap() = LockState::Locked;
        self.require_passphrase.store(true, Ordering::SeqCst);
    }
}
