//! Session controller.
//!
//! One top-level object owns the key manager, local store, sync engine
//! and event bus. The unwrapped DEK is session state injected into
//! every cryptographic call through this controller — never an ambient
//! global.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::crypto::{
    decrypt_string, encrypt_string, CryptoError, EncBlob, EncryptionKey, KeyManager, LockState,
};
use crate::events::{ChangeEvent, EventBus, Subscription};
use crate::models::{next_updated_at, EntityKind, Note, Tag, UserRecord};
use crate::remote::RemoteStore;
use crate::store::{KeyValueStore, LocalStore, Mutation, StoreError};
use crate::sync::{SyncEngine, SyncError, SyncOutcome};

/// Errors surfaced by the session API
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("No signed-in user")]
    NoUser,

    #[error("Encryption is already set up for this account")]
    AlreadyInitialized,

    #[error("No {kind} with id {id}")]
    EntityNotFound { kind: EntityKind, id: Uuid },
}

/// Plaintext input for creating or replacing a note
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<Uuid>,
}

/// Plaintext input for creating or replacing a tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDraft {
    pub name: String,
    pub color: String,
}

/// Transient decrypted view of a note. A field that failed to decrypt
/// is `None` — partial corruption never blanks the whole list.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedNote {
    pub id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub tags: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transient decrypted view of a tag
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedTag {
    pub id: Uuid,
    pub name: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct SessionController {
    store: Arc<LocalStore>,
    keys: KeyManager,
    engine: SyncEngine,
    events: EventBus,
    config: EngineConfig,
}

impl SessionController {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(LocalStore::new(kv));
        let events = EventBus::new();
        let engine = SyncEngine::new(store.clone(), remote, events.clone(), config.clone());
        Self {
            store,
            keys: KeyManager::new(),
            engine,
            events,
            config,
        }
    }

    /// Attach a listener for change notifications
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    // ===== Account & key lifecycle =====

    /// Load the signed-in user, creating the record at first sign-in
    pub fn sign_in(
        &self,
        external_id: &str,
        email: &str,
    ) -> Result<UserRecord, SessionError> {
        if let Some(user) = self.store.user()? {
            return Ok(user);
        }
        let user = UserRecord::new(external_id, email);
        self.store.put_user(&user)?;
        log::info!("Session: created user record for {}", external_id);
        Ok(user)
    }

    /// First-time encryption setup: generates and wraps the DEK,
    /// persists the key material, and leaves the session unlocked.
    pub fn initialize_encryption(&self, passphrase: &str) -> Result<(), SessionError> {
        let mut user = self.store.user()?.ok_or(SessionError::NoUser)?;
        if user.has_key_material() {
            return Err(SessionError::AlreadyInitialized);
        }

        let cache = self
            .keys
            .initialize(&mut user, passphrase, self.config.kdf_iterations)?;
        self.store.put_user(&user)?;
        self.store.put_device_cache(&cache)?;

        self.events.publish(ChangeEvent::LockStateChanged {
            state: self.keys.state(),
        });
        log::info!("Session: encryption initialized for {}", user.external_id);
        Ok(())
    }

    /// Unlock the session. The device-local cache is tried first when
    /// allowed; otherwise `passphrase` must be provided. Failures are
    /// retryable.
    pub fn unlock(&self, passphrase: Option<&str>) -> Result<(), SessionError> {
        let user = self.store.user()?.ok_or(SessionError::NoUser)?;
        if !user.has_key_material() {
            return Err(CryptoError::NotInitialized.into());
        }

        let cache = self.store.device_cache()?;
        let refreshed = self.keys.unlock(&user, cache.as_ref(), passphrase)?;
        if let Some(cache) = refreshed {
            self.store.put_device_cache(&cache)?;
        }

        self.events.publish(ChangeEvent::LockStateChanged {
            state: self.keys.state(),
        });
        Ok(())
    }

    /// Hide decrypted data: drops the in-memory DEK and forces the next
    /// unlock through the passphrase prompt. The device cache survives.
    pub fn lock(&self) {
        self.keys.lock();
        self.events.publish(ChangeEvent::LockStateChanged {
            state: self.keys.state(),
        });
        log::info!("Session: locked");
    }

    /// Remove the device unlock cache ("forget this device")
    pub fn forget_device(&self) -> Result<(), SessionError> {
        self.store.clear_device_cache()?;
        Ok(())
    }

    pub fn lock_state(&self) -> LockState {
        self.keys.state()
    }

    // ===== Entity operations (optimistic-local, queue-backed) =====

    /// Create a note: encrypt, write the snapshot, queue the upload.
    /// Succeeds offline.
    pub fn create_note(&self, draft: NoteDraft) -> Result<DecryptedNote, SessionError> {
        let dek = self.keys.dek()?;
        let now = next_updated_at(None);
        let note = Note {
            id: Uuid::new_v4(),
            title_enc: encrypt_opt(&dek, draft.title.as_deref())?,
            description_enc: encrypt_opt(&dek, draft.description.as_deref())?,
            content_enc: encrypt_opt(&dek, draft.content.as_deref())?,
            tags: draft.tags,
            created_at: now,
            updated_at: now,
        };

        let mut notes = self.store.read_notes()?;
        notes.push(note.clone());
        self.store.write_notes(&notes)?;
        self.store.enqueue(Mutation::CreateNote { note: note.clone() })?;

        self.events
            .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Note });
        Ok(self.decrypt_note(&dek, &note))
    }

    /// Replace a note's fields, bumping `updatedAt`
    pub fn update_note(&self, id: Uuid, draft: NoteDraft) -> Result<DecryptedNote, SessionError> {
        let dek = self.keys.dek()?;
        let mut notes = self.store.read_notes()?;
        let note = notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(SessionError::EntityNotFound {
                kind: EntityKind::Note,
                id,
            })?;

        note.title_enc = encrypt_opt(&dek, draft.title.as_deref())?;
        note.description_enc = encrypt_opt(&dek, draft.description.as_deref())?;
        note.content_enc = encrypt_opt(&dek, draft.content.as_deref())?;
        note.tags = draft.tags;
        note.updated_at = next_updated_at(Some(note.updated_at));
        let updated = note.clone();

        self.store.write_notes(&notes)?;
        self.store
            .enqueue(Mutation::UpdateNote { note: updated.clone() })?;

        self.events
            .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Note });
        Ok(self.decrypt_note(&dek, &updated))
    }

    pub fn delete_note(&self, id: Uuid) -> Result<(), SessionError> {
        let mut notes = self.store.read_notes()?;
        let before = notes.len();
        notes.retain(|n| n.id != id);
        if notes.len() == before {
            return Err(SessionError::EntityNotFound {
                kind: EntityKind::Note,
                id,
            });
        }

        self.store.write_notes(&notes)?;
        self.store.enqueue(Mutation::DeleteNote { note_id: id })?;

        self.events
            .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Note });
        Ok(())
    }

    pub fn create_tag(&self, draft: TagDraft) -> Result<DecryptedTag, SessionError> {
        let dek = self.keys.dek()?;
        let now = next_updated_at(None);
        let tag = Tag {
            id: Uuid::new_v4(),
            name_enc: encrypt_string(&dek, &draft.name)?,
            color_enc: encrypt_string(&dek, &draft.color)?,
            created_at: now,
            updated_at: now,
        };

        let mut tags = self.store.read_tags()?;
        tags.push(tag.clone());
        self.store.write_tags(&tags)?;
        self.store.enqueue(Mutation::CreateTag { tag: tag.clone() })?;

        self.events
            .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Tag });
        Ok(self.decrypt_tag(&dek, &tag))
    }

    pub fn update_tag(&self, id: Uuid, draft: TagDraft) -> Result<DecryptedTag, SessionError> {
        let dek = self.keys.dek()?;
        let mut tags = self.store.read_tags()?;
        let tag = tags
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(SessionError::EntityNotFound {
                kind: EntityKind::Tag,
                id,
            })?;

        tag.name_enc = encrypt_string(&dek, &draft.name)?;
        tag.color_enc = encrypt_string(&dek, &draft.color)?;
        tag.updated_at = next_updated_at(Some(tag.updated_at));
        let updated = tag.clone();

        self.store.write_tags(&tags)?;
        self.store
            .enqueue(Mutation::UpdateTag { tag: updated.clone() })?;

        self.events
            .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Tag });
        Ok(self.decrypt_tag(&dek, &updated))
    }

    /// Delete a tag and strip its id from every note that references
    /// it. The affected notes are re-queued so the strip propagates.
    pub fn delete_tag(&self, id: Uuid) -> Result<(), SessionError> {
        let mut tags = self.store.read_tags()?;
        let before = tags.len();
        tags.retain(|t| t.id != id);
        if tags.len() == before {
            return Err(SessionError::EntityNotFound {
                kind: EntityKind::Tag,
                id,
            });
        }
        self.store.write_tags(&tags)?;

        let mut notes = self.store.read_notes()?;
        let mut stripped = Vec::new();
        for note in notes.iter_mut() {
            if note.tags.remove(&id) {
                note.updated_at = next_updated_at(Some(note.updated_at));
                stripped.push(note.clone());
            }
        }
        if !stripped.is_empty() {
            self.store.write_notes(&notes)?;
            for note in stripped {
                self.store.enqueue(Mutation::UpdateNote { note })?;
            }
            self.events
                .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Note });
        }

        self.store.enqueue(Mutation::DeleteTag { tag_id: id })?;
        self.events
            .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Tag });
        Ok(())
    }

    // ===== Decrypted views =====

    pub fn list_notes(&self) -> Result<Vec<DecryptedNote>, SessionError> {
        let dek = self.keys.dek()?;
        let notes = self.store.read_notes()?;
        Ok(notes.iter().map(|n| self.decrypt_note(&dek, n)).collect())
    }

    pub fn list_tags(&self) -> Result<Vec<DecryptedTag>, SessionError> {
        let dek = self.keys.dek()?;
        let tags = self.store.read_tags()?;
        Ok(tags.iter().map(|t| self.decrypt_tag(&dek, t)).collect())
    }

    fn decrypt_note(&self, dek: &EncryptionKey, note: &Note) -> DecryptedNote {
        DecryptedNote {
            id: note.id,
            title: decrypt_field(dek, note.title_enc.as_ref(), "title", note.id),
            description: decrypt_field(dek, note.description_enc.as_ref(), "description", note.id),
            content: decrypt_field(dek, note.content_enc.as_ref(), "content", note.id),
            tags: note.tags.clone(),
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }

    fn decrypt_tag(&self, dek: &EncryptionKey, tag: &Tag) -> DecryptedTag {
        DecryptedTag {
            id: tag.id,
            name: decrypt_field(dek, Some(&tag.name_enc), "name", tag.id),
            color: decrypt_field(dek, Some(&tag.color_enc), "color", tag.id),
            created_at: tag.created_at,
            updated_at: tag.updated_at,
        }
    }

    // ===== Sync =====

    pub async fn manual_sync(&self) -> SyncOutcome {
        self.engine.manual_sync().await
    }

    pub async fn check_discrepancies(&self, deep: bool) -> bool {
        self.engine.check_discrepancies(deep).await
    }

    /// Pull if the freshness window has lapsed or the cheap probe
    /// reports drift
    pub async fn sync_if_stale(&self) -> Result<bool, SessionError> {
        Ok(self.engine.pull(false).await?)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.engine.has_pending_changes()
    }

    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }
}

fn encrypt_opt(
    dek: &EncryptionKey,
    plaintext: Option<&str>,
) -> Result<Option<EncBlob>, CryptoError> {
    plaintext.map(|p| encrypt_string(dek, p)).transpose()
}

/// Decrypt one field, swallowing failures: a corrupt field renders as
/// absent rather than failing the whole entity.
fn decrypt_field(
    dek: &EncryptionKey,
    blob: Option<&EncBlob>,
    field: &str,
    entity_id: Uuid,
) -> Option<String> {
    let blob = blob?;
    match decrypt_string(dek, blob) {
        Ok(plaintext) => Some(plaintext),
        Err(e) => {
            log::warn!(
                "Session: failed to decrypt {} of {}: {}",
                field,
                entity_id,
                e
            );
            None
        }
    }
}
