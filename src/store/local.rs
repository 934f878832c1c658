//! Durable local snapshot store plus the mutation queue

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::DeviceUnlockCache;
use crate::models::{EntityKind, Note, Tag, UserRecord};

use super::errors::{StoreError, StoreResult};
use super::kv::KeyValueStore;
use super::queue::{Mutation, MutationQueue, MutationQueueItem};

const SNAPSHOTS: &str = "snapshots";
const SYNC: &str = "sync";
const AUTH: &str = "auth";
const DEVICE: &str = "device";

const QUEUE_KEY: &str = "queue";
const FRESHNESS_KEY: &str = "freshness";
const USER_KEY: &str = "user";
const UNLOCK_KEY: &str = "unlock";

/// Freshness timestamps, one per snapshot collection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Freshness {
    #[serde(skip_serializing_if = "Option::is_none")]
    notes_pulled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags_pulled_at: Option<DateTime<Utc>>,
}

/// Durable local state: one snapshot per entity collection, freshness
/// timestamps, the FIFO mutation queue, and the auth/device records.
///
/// Snapshot replaces and queue mutations are each atomic (delegated to
/// the underlying [`KeyValueStore`]); queue order survives restarts.
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles on the queue and freshness
    /// documents.
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    fn read_vec<T: serde::de::DeserializeOwned>(&self, key: &str) -> StoreResult<Vec<T>> {
        match self.kv.get(SNAPSHOTS, key)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    fn write_vec<T: Serialize>(&self, key: &str, entities: &[T]) -> StoreResult<()> {
        let value = serde_json::to_value(entities)?;
        self.kv.put(SNAPSHOTS, key, &value)
    }

    // ===== Snapshots =====

    pub fn read_notes(&self) -> StoreResult<Vec<Note>> {
        self.read_vec("notes")
    }

    /// Atomic replace of the notes snapshot
    pub fn write_notes(&self, notes: &[Note]) -> StoreResult<()> {
        self.write_vec("notes", notes)
    }

    pub fn read_tags(&self) -> StoreResult<Vec<Tag>> {
        self.read_vec("tags")
    }

    /// Atomic replace of the tags snapshot
    pub fn write_tags(&self, tags: &[Tag]) -> StoreResult<()> {
        self.write_vec("tags", tags)
    }

    // ===== Freshness =====

    fn read_freshness(&self) -> StoreResult<Freshness> {
        match self.kv.get(SYNC, FRESHNESS_KEY)? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_default()),
            None => Ok(Freshness::default()),
        }
    }

    /// When the collection was last pulled from remote, if ever
    pub fn snapshot_pulled_at(&self, kind: EntityKind) -> StoreResult<Option<DateTime<Utc>>> {
        let freshness = self.read_freshness()?;
        Ok(match kind {
            EntityKind::Note => freshness.notes_pulled_at,
            EntityKind::Tag => freshness.tags_pulled_at,
        })
    }

    /// Record a successful pull for the collection
    pub fn mark_snapshot_pulled(&self, kind: EntityKind) -> StoreResult<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut freshness = self.read_freshness()?;
        match kind {
            EntityKind::Note => freshness.notes_pulled_at = Some(Utc::now()),
            EntityKind::Tag => freshness.tags_pulled_at = Some(Utc::now()),
        }
        self.kv.put(SYNC, FRESHNESS_KEY, &serde_json::to_value(freshness)?)
    }

    // ===== Mutation queue =====

    fn read_queue(&self) -> StoreResult<MutationQueue> {
        match self.kv.get(SYNC, QUEUE_KEY)? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::QueueIntegrity(e.to_string())),
            None => Ok(MutationQueue::new()),
        }
    }

    fn write_queue(&self, queue: &MutationQueue) -> StoreResult<()> {
        self.kv.put(SYNC, QUEUE_KEY, &serde_json::to_value(queue)?)
    }

    /// Append a mutation to the durable queue, returning the entry id
    pub fn enqueue(&self, mutation: Mutation) -> StoreResult<Uuid> {
        let _guard = self.write_lock.lock().unwrap();
        let mut queue = self.read_queue()?;
        let id = queue.enqueue(mutation);
        self.write_queue(&queue)?;
        Ok(id)
    }

    /// All pending entries in FIFO order
    pub fn list_queue(&self) -> StoreResult<Vec<MutationQueueItem>> {
        Ok(self.read_queue()?.items)
    }

    /// Remove a completed entry
    pub fn dequeue(&self, id: Uuid) -> StoreResult<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut queue = self.read_queue()?;
        queue.dequeue(id);
        self.write_queue(&queue)
    }

    pub fn pending_count(&self) -> StoreResult<usize> {
        Ok(self.read_queue()?.len())
    }

    // ===== Auth & device records =====

    pub fn user(&self) -> StoreResult<Option<UserRecord>> {
        match self.kv.get(AUTH, USER_KEY)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn put_user(&self, user: &UserRecord) -> StoreResult<()> {
        self.kv.put(AUTH, USER_KEY, &serde_json::to_value(user)?)
    }

    /// Device unlock cache, if this device has one. A cache that fails
    /// to parse is treated as absent — the unlock flow falls back to
    /// the passphrase path.
    pub fn device_cache(&self) -> StoreResult<Option<DeviceUnlockCache>> {
        match self.kv.get(DEVICE, UNLOCK_KEY)? {
            Some(value) => match serde_json::from_value(value) {
                Ok(cache) => Ok(Some(cache)),
                Err(e) => {
                    log::warn!("Store: discarding unreadable device unlock cache: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub fn put_device_cache(&self, cache: &DeviceUnlockCache) -> StoreResult<()> {
        self.kv.put(DEVICE, UNLOCK_KEY, &serde_json::to_value(cache)?)
    }

    pub fn clear_device_cache(&self) -> StoreResult<()> {
        self.kv.delete(DEVICE, UNLOCK_KEY)
    }

    /// Wipe everything, including snapshots and the queue
    pub fn clear_all(&self) -> StoreResult<()> {
        self.kv.clear_all()
    }
}
