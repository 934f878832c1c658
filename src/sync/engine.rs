use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::events::{ChangeEvent, EventBus};
use crate::models::{EntityKind, Note, Tag};
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{LocalStore, Mutation, MutationQueueItem};

use super::envelope::{open, seal, EnvelopeKind};
use super::errors::{SyncError, SyncResult};
use super::merge::merge_data;

/// Remote container holding one object per note
const NOTES_CONTAINER: &str = "notes";
/// Remote container holding the single tag-collection object
const TAGS_CONTAINER: &str = "tags";
/// Name of the tag-collection object. Tags have no per-item remote
/// address; every tag mutation is read-modify-write of this one object.
const TAGS_OBJECT: &str = "tags.json";

fn note_object_name(note_id: &Uuid) -> String {
    format!("{}.json", note_id)
}

/// Outcome of a manual sync, surfaced to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub notes_pushed: usize,
    pub notes_deleted: usize,
    pub tags_pushed: usize,
    /// Whether a pull merged remote changes into the local snapshot
    pub pulled: bool,
    pub duration_ms: u64,
}

impl SyncOutcome {
    fn failure(message: String, start: Instant) -> Self {
        Self {
            success: false,
            message,
            notes_pushed: 0,
            notes_deleted: 0,
            tags_pushed: 0,
            pulled: false,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DrainStats {
    notes_pushed: usize,
    notes_deleted: usize,
    tags_pushed: usize,
}

#[derive(Debug, Clone, Copy)]
struct PullResult {
    /// A pull actually ran (not skipped as fresh)
    performed: bool,
    /// The merge changed the local snapshot
    changed: bool,
}

#[derive(Clone)]
struct Containers {
    notes: String,
    tags: String,
}

#[derive(Default)]
struct DeepCheckState {
    running: bool,
    last_started: Option<Instant>,
}

/// Keeps the local store eventually consistent with a remote that has
/// no transactions, no per-item addressing for tags, and no change
/// notifications.
///
/// Pushes drain the mutation queue strictly FIFO; pulls merge the
/// remote snapshot with last-write-wins. A single in-flight gate keeps
/// a drain and a pull from ever running concurrently against the same
/// snapshot.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    events: EventBus,
    config: EngineConfig,
    /// Serializes push drains and pull merges
    gate: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
    containers: tokio::sync::Mutex<Option<Containers>>,
    deep_check: Mutex<DeepCheckState>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remote,
            events,
            config,
            gate: tokio::sync::Mutex::new(()),
            syncing: AtomicBool::new(false),
            containers: tokio::sync::Mutex::new(None),
            deep_check: Mutex::new(DeepCheckState::default()),
        }
    }

    /// Whether the durable queue holds changes not yet applied remotely
    pub fn has_pending_changes(&self) -> bool {
        self.store.pending_count().map(|c| c > 0).unwrap_or(true)
    }

    /// Whether a drain or pull is currently in flight
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    fn begin_sync(&self) -> SyncingGuard<'_> {
        self.syncing.store(true, Ordering::SeqCst);
        self.events
            .publish(ChangeEvent::SyncStateChanged { syncing: true });
        SyncingGuard { engine: self }
    }

    async fn containers(&self) -> Result<Containers, RemoteError> {
        let mut cached = self.containers.lock().await;
        if let Some(containers) = cached.as_ref() {
            return Ok(containers.clone());
        }
        let notes = self
            .remote
            .find_or_create_container(NOTES_CONTAINER, None)
            .await?;
        let tags = self
            .remote
            .find_or_create_container(TAGS_CONTAINER, None)
            .await?;
        let containers = Containers { notes, tags };
        *cached = Some(containers.clone());
        Ok(containers)
    }

    /// Drain the queue, then pull if drifted or stale. The single
    /// user-facing sync entry point.
    pub async fn manual_sync(&self) -> SyncOutcome {
        let start = Instant::now();
        let _gate = self.gate.lock().await;
        let _syncing = self.begin_sync();

        log::info!("Sync: manual sync starting");

        let pending = match self.store.list_queue() {
            Ok(items) => items,
            Err(e) => return SyncOutcome::failure(format!("Sync failed: {}", e), start),
        };

        let mut stats = DrainStats::default();
        if !pending.is_empty() {
            match self.drain(pending).await {
                Ok(s) => stats = s,
                Err(e) => {
                    log::error!("Sync: {}", e);
                    return SyncOutcome::failure(format!("Sync failed: {}", e), start);
                }
            }
        }

        let pull = match self.pull_inner(false).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Sync: pull failed: {}", e);
                return SyncOutcome::failure(format!("Sync failed: {}", e), start);
            }
        };
        log::debug!(
            "Sync: pull performed={} changed={}",
            pull.performed,
            pull.changed
        );

        let pushed = stats.notes_pushed + stats.notes_deleted + stats.tags_pushed;
        let message = if pushed == 0 && !pull.changed {
            "No changes".to_string()
        } else if pull.changed {
            format!("Pushed {} change(s), merged remote changes", pushed)
        } else {
            format!("Pushed {} change(s)", pushed)
        };
        log::info!(
            "Sync: manual sync complete — {} ({} ms)",
            message,
            start.elapsed().as_millis()
        );

        SyncOutcome {
            success: true,
            message,
            notes_pushed: stats.notes_pushed,
            notes_deleted: stats.notes_deleted,
            tags_pushed: stats.tags_pushed,
            pulled: pull.changed,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Drain the queue without pulling
    pub async fn push(&self) -> SyncResult<()> {
        let _gate = self.gate.lock().await;
        let _syncing = self.begin_sync();
        let pending = self.store.list_queue()?;
        if pending.is_empty() {
            return Ok(());
        }
        self.drain(pending).await.map(|_| ())
    }

    /// Pull and merge; `force` bypasses the freshness window
    pub async fn pull(&self, force: bool) -> SyncResult<bool> {
        let _gate = self.gate.lock().await;
        let _syncing = self.begin_sync();
        Ok(self.pull_inner(force).await?.changed)
    }

    /// Apply queued mutations to the remote, strictly FIFO.
    ///
    /// Each completed item is dequeued immediately (at-least-once). Any
    /// non-benign failure aborts: the failing item and everything after
    /// it stay enqueued, and one aggregated error is surfaced.
    async fn drain(&self, items: Vec<MutationQueueItem>) -> SyncResult<DrainStats> {
        let total = items.len();
        let abort = |completed: usize, source: SyncError| SyncError::DrainAborted {
            completed,
            remaining: total - completed,
            source: Box::new(source),
        };

        let containers = self
            .containers()
            .await
            .map_err(|e| abort(0, e.into()))?;

        // One listing up front; kept current as puts and deletes land.
        let note_listing = self
            .remote
            .list_objects(&containers.notes)
            .await
            .map_err(|e| abort(0, e.into()))?;
        let mut note_objects: HashMap<String, String> = note_listing
            .into_iter()
            .map(|o| (o.name, o.id))
            .collect();
        let tags_listing = self
            .remote
            .list_objects(&containers.tags)
            .await
            .map_err(|e| abort(0, e.into()))?;
        let mut tags_object_id = tags_listing
            .into_iter()
            .find(|o| o.name == TAGS_OBJECT)
            .map(|o| o.id);

        // Working copies; written back only after a fully successful drain.
        let mut notes = self.store.read_notes().map_err(|e| abort(0, e.into()))?;
        let mut tags = self.store.read_tags().map_err(|e| abort(0, e.into()))?;

        let mut stats = DrainStats::default();
        let mut completed = 0usize;

        for item in items {
            log::debug!("Sync: applying {} ({})", item.mutation.kind(), item.id);
            let applied = self
                .apply(
                    &containers,
                    &mut note_objects,
                    &mut tags_object_id,
                    &mut notes,
                    &mut tags,
                    &item.mutation,
                    &mut stats,
                )
                .await;
            match applied {
                Ok(()) => {
                    self.store
                        .dequeue(item.id)
                        .map_err(|e| abort(completed, e.into()))?;
                    completed += 1;
                }
                Err(e) => {
                    log::error!(
                        "Sync: drain aborted at {} after {} item(s)",
                        item.mutation.kind(),
                        completed
                    );
                    return Err(abort(completed, e));
                }
            }
        }

        self.store
            .write_notes(&notes)
            .map_err(|e| abort(completed, e.into()))?;
        self.store
            .write_tags(&tags)
            .map_err(|e| abort(completed, e.into()))?;

        log::info!(
            "Sync: drained {} item(s) — {} note put(s), {} note delete(s), {} tag write(s)",
            completed,
            stats.notes_pushed,
            stats.notes_deleted,
            stats.tags_pushed
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        containers: &Containers,
        note_objects: &mut HashMap<String, String>,
        tags_object_id: &mut Option<String>,
        notes: &mut Vec<Note>,
        tags: &mut Vec<Tag>,
        mutation: &Mutation,
        stats: &mut DrainStats,
    ) -> SyncResult<()> {
        match mutation {
            Mutation::CreateNote { note } | Mutation::UpdateNote { note } => {
                if matches!(mutation, Mutation::UpdateNote { .. })
                    && !notes.iter().any(|n| n.id == note.id)
                {
                    // Already deleted elsewhere; updating nothing is success.
                    log::info!("Sync: skipping update of locally deleted note {}", note.id);
                    return Ok(());
                }
                self.put_note(containers, note_objects, note).await?;
                match notes.iter_mut().find(|n| n.id == note.id) {
                    Some(existing) if existing.updated_at < note.updated_at => {
                        *existing = note.clone();
                    }
                    Some(_) => {}
                    None => notes.push(note.clone()),
                }
                stats.notes_pushed += 1;
            }
            Mutation::DeleteNote { note_id } => {
                let name = note_object_name(note_id);
                match note_objects.remove(&name) {
                    Some(object_id) => match self.remote.delete_object(&object_id).await {
                        Ok(()) => {}
                        Err(RemoteError::NotFound(_)) => {
                            log::debug!("Sync: note {} already absent remotely", note_id);
                        }
                        Err(e) => return Err(e.into()),
                    },
                    // Not listed remotely: the delete is already done.
                    None => log::debug!("Sync: note {} already absent remotely", note_id),
                }
                notes.retain(|n| n.id != *note_id);
                stats.notes_deleted += 1;
            }
            Mutation::CreateTag { tag } | Mutation::UpdateTag { tag } => {
                match tags.iter_mut().find(|t| t.id == tag.id) {
                    Some(existing) if existing.updated_at <= tag.updated_at => {
                        *existing = tag.clone();
                    }
                    Some(_) => {}
                    None => tags.push(tag.clone()),
                }
                self.put_tags(containers, tags_object_id, tags).await?;
                stats.tags_pushed += 1;
            }
            Mutation::DeleteTag { tag_id } => {
                tags.retain(|t| t.id != *tag_id);
                self.put_tags(containers, tags_object_id, tags).await?;
                stats.tags_pushed += 1;
            }
        }
        Ok(())
    }

    /// Upload one note object. Overwrite-in-place is not assumed, so an
    /// existing object of the same name is deleted first.
    async fn put_note(
        &self,
        containers: &Containers,
        note_objects: &mut HashMap<String, String>,
        note: &Note,
    ) -> SyncResult<()> {
        let name = note_object_name(&note.id);
        let bytes = seal(EnvelopeKind::Note, note)?;

        if let Some(existing) = note_objects.remove(&name) {
            match self.remote.delete_object(&existing).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let id = self.remote.put_object(&containers.notes, &name, &bytes).await?;
        note_objects.insert(name, id);
        Ok(())
    }

    /// Overwrite the single remote tags object with the full collection
    async fn put_tags(
        &self,
        containers: &Containers,
        tags_object_id: &mut Option<String>,
        tags: &[Tag],
    ) -> SyncResult<()> {
        let bytes = seal(EnvelopeKind::TagCollection, &tags)?;

        if let Some(existing) = tags_object_id.take() {
            match self.remote.delete_object(&existing).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => {
                    *tags_object_id = Some(existing);
                    return Err(e.into());
                }
            }
        }

        let id = self
            .remote
            .put_object(&containers.tags, TAGS_OBJECT, &bytes)
            .await?;
        *tags_object_id = Some(id);
        Ok(())
    }

    async fn pull_inner(&self, force: bool) -> SyncResult<PullResult> {
        if !force && self.snapshots_fresh()? {
            // Inside the freshness window, pull only when the cheap
            // count probe reports drift.
            if !self.cheap_check().await {
                log::debug!("Sync: snapshots fresh, skipping pull");
                return Ok(PullResult {
                    performed: false,
                    changed: false,
                });
            }
        }

        let containers = self.containers().await?;

        let listing = self.remote.list_objects(&containers.notes).await?;
        let mut remote_notes = Vec::with_capacity(listing.len());
        for object in &listing {
            let bytes = self.remote.get_object_bytes(&object.id).await?;
            match open::<Note>(&bytes, EnvelopeKind::Note) {
                Ok(note) => remote_notes.push(note),
                Err(e) => {
                    log::warn!("Sync: skipping unreadable remote note {}: {}", object.name, e);
                }
            }
        }
        let remote_tags = self.fetch_remote_tags(&containers).await?;

        let local_notes = self.store.read_notes()?;
        let local_tags = self.store.read_tags()?;
        let merged_notes = merge_data(&local_notes, &remote_notes);
        let merged_tags = merge_data(&local_tags, &remote_tags);
        let changed = merged_notes != local_notes || merged_tags != local_tags;

        self.store.write_notes(&merged_notes)?;
        self.store.write_tags(&merged_tags)?;
        self.store.mark_snapshot_pulled(EntityKind::Note)?;
        self.store.mark_snapshot_pulled(EntityKind::Tag)?;

        if changed {
            self.events
                .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Note });
            self.events
                .publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Tag });
        }

        log::info!(
            "Sync: pulled {} note(s), {} tag(s) (changed={})",
            merged_notes.len(),
            merged_tags.len(),
            changed
        );
        Ok(PullResult {
            performed: true,
            changed,
        })
    }

    fn snapshots_fresh(&self) -> SyncResult<bool> {
        let ttl = chrono::Duration::seconds(self.config.snapshot_ttl_secs as i64);
        let now = Utc::now();
        let is_fresh =
            |pulled: Option<DateTime<Utc>>| pulled.map(|t| now - t < ttl).unwrap_or(false);
        Ok(is_fresh(self.store.snapshot_pulled_at(EntityKind::Note)?)
            && is_fresh(self.store.snapshot_pulled_at(EntityKind::Tag)?))
    }

    async fn fetch_remote_tags(&self, containers: &Containers) -> SyncResult<Vec<Tag>> {
        let listing = self.remote.list_objects(&containers.tags).await?;
        let Some(object) = listing.into_iter().find(|o| o.name == TAGS_OBJECT) else {
            return Ok(Vec::new());
        };
        let bytes = self.remote.get_object_bytes(&object.id).await?;
        match open::<Vec<Tag>>(&bytes, EnvelopeKind::TagCollection) {
            Ok(tags) => Ok(tags),
            Err(e) => {
                log::warn!("Sync: unreadable remote tag collection: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Probe for remote-origin drift. `deep` compares timestamps and is
    /// debounced + single-flight; a deep hit triggers a full pull+merge.
    /// A failed probe never surfaces an error — it reports "no
    /// divergence detected this round".
    pub async fn check_discrepancies(&self, deep: bool) -> bool {
        if deep {
            self.deep_check().await
        } else {
            self.cheap_check().await
        }
    }

    /// Count comparison only: remote note objects vs local notes, and
    /// remote tag collection length vs local tags.
    async fn cheap_check(&self) -> bool {
        match self.cheap_check_inner().await {
            Ok(divergent) => divergent,
            Err(e) => {
                log::debug!("Sync: discrepancy check failed ({}), assuming none this round", e);
                false
            }
        }
    }

    async fn cheap_check_inner(&self) -> SyncResult<bool> {
        let containers = self.containers().await?;

        let remote_note_count = self.remote.list_objects(&containers.notes).await?.len();
        let local_note_count = self.store.read_notes()?.len();
        if remote_note_count != local_note_count {
            log::info!(
                "Sync: note count drift (remote={}, local={})",
                remote_note_count,
                local_note_count
            );
            return Ok(true);
        }

        let remote_tag_count = self.fetch_remote_tags(&containers).await?.len();
        let local_tag_count = self.store.read_tags()?.len();
        if remote_tag_count != local_tag_count {
            log::info!(
                "Sync: tag count drift (remote={}, local={})",
                remote_tag_count,
                local_tag_count
            );
            return Ok(true);
        }
        Ok(false)
    }

    async fn deep_check(&self) -> bool {
        {
            let mut state = self.deep_check.lock().unwrap();
            if state.running {
                log::debug!("Sync: deep check already in flight");
                return false;
            }
            let window = Duration::from_millis(self.config.deep_check_debounce_ms);
            if let Some(last) = state.last_started {
                if last.elapsed() < window {
                    log::debug!("Sync: deep check debounced");
                    return false;
                }
            }
            state.running = true;
            state.last_started = Some(Instant::now());
        }

        let divergent = match self.deep_check_inner().await {
            Ok(divergent) => divergent,
            Err(e) => {
                log::debug!("Sync: deep check failed ({}), assuming none this round", e);
                false
            }
        };
        self.deep_check.lock().unwrap().running = false;

        if divergent {
            log::info!("Sync: deep check found drift, pulling");
            if let Err(e) = self.pull(true).await {
                log::warn!("Sync: pull after deep check failed: {}", e);
            }
        }
        divergent
    }

    async fn deep_check_inner(&self) -> SyncResult<bool> {
        let containers = self.containers().await?;

        // Tags: one object holds the whole collection, so compare every
        // tag's stamp.
        let remote_tags = self.fetch_remote_tags(&containers).await?;
        let local_tags = self.store.read_tags()?;
        if tags_diverge(&local_tags, &remote_tags) {
            return Ok(true);
        }

        // Notes: sample a handful of remote objects and compare stamps.
        let listing = self.remote.list_objects(&containers.notes).await?;
        let local_notes = self.store.read_notes()?;
        if listing.len() != local_notes.len() {
            return Ok(true);
        }
        let local_by_id: HashMap<Uuid, DateTime<Utc>> =
            local_notes.iter().map(|n| (n.id, n.updated_at)).collect();

        let sample = listing.choose_multiple(
            &mut rand::thread_rng(),
            self.config.deep_check_note_samples,
        );
        for object in sample {
            let bytes = self.remote.get_object_bytes(&object.id).await?;
            let note: Note = match open(&bytes, EnvelopeKind::Note) {
                Ok(note) => note,
                Err(_) => return Ok(true),
            };
            if local_by_id.get(&note.id) != Some(&note.updated_at) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn tags_diverge(local: &[Tag], remote: &[Tag]) -> bool {
    if local.len() != remote.len() {
        return true;
    }
    let local_by_id: HashMap<Uuid, DateTime<Utc>> =
        local.iter().map(|t| (t.id, t.updated_at)).collect();
    remote
        .iter()
        .any(|t| local_by_id.get(&t.id) != Some(&t.updated_at))
}

struct SyncingGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.engine.syncing.store(false, Ordering::SeqCst);
        self.engine
            .events
            .publish(ChangeEvent::SyncStateChanged { syncing: false });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::store::{KeyValueStore, MemoryKvStore};

    fn test_note(secs: i64) -> Note {
        let stamp = Utc::now() + chrono::Duration::seconds(secs);
        Note {
            id: Uuid::new_v4(),
            title_enc: None,
            description_enc: None,
            content_enc: None,
            tags: Default::default(),
            created_at: stamp,
            updated_at: stamp,
        }
    }

    fn test_tag(secs: i64) -> Tag {
        let stamp = Utc::now() + chrono::Duration::seconds(secs);
        Tag {
            id: Uuid::new_v4(),
            name_enc: crate::crypto::EncBlob {
                ct: "name".to_string(),
                iv: "iv".to_string(),
            },
            color_enc: crate::crypto::EncBlob {
                ct: "color".to_string(),
                iv: "iv".to_string(),
            },
            created_at: stamp,
            updated_at: stamp,
        }
    }

    fn engine_over(remote: Arc<MemoryRemote>) -> (SyncEngine, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::new(Arc::new(MemoryKvStore::new())));
        let engine = SyncEngine::new(
            store.clone(),
            remote,
            EventBus::new(),
            EngineConfig {
                deep_check_debounce_ms: 0,
                ..EngineConfig::default()
            },
        );
        (engine, store)
    }

    #[tokio::test]
    async fn test_offline_create_then_drain() {
        let _ = env_logger::builder().is_test(true).try_init();
        let remote = Arc::new(MemoryRemote::new());
        let (engine, store) = engine_over(remote.clone());

        // Offline create: queued locally, nothing remote.
        remote.set_offline(true);
        let note = test_note(0);
        store.write_notes(std::slice::from_ref(&note)).unwrap();
        store
            .enqueue(Mutation::CreateNote { note: note.clone() })
            .unwrap();
        assert!(engine.has_pending_changes());

        let outcome = engine.manual_sync().await;
        assert!(!outcome.success);
        assert!(engine.has_pending_changes(), "queue must survive the failure");

        // Back online: the drain uploads and empties the queue.
        remote.set_offline(false);
        let outcome = engine.manual_sync().await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.notes_pushed, 1);
        assert!(!engine.has_pending_changes());
        assert!(remote
            .object_bytes(NOTES_CONTAINER, &note_object_name(&note.id))
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_of_missing_note_is_benign() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, store) = engine_over(remote.clone());

        store
            .enqueue(Mutation::DeleteNote { note_id: Uuid::new_v4() })
            .unwrap();

        let outcome = engine.manual_sync().await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.notes_deleted, 1);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_of_locally_deleted_note_is_noop() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, store) = engine_over(remote.clone());

        // Note is absent from the local snapshot — deleted elsewhere.
        let ghost = test_note(0);
        store
            .enqueue(Mutation::UpdateNote { note: ghost.clone() })
            .unwrap();

        let outcome = engine.manual_sync().await;
        assert!(outcome.success);
        assert_eq!(remote.put_count(), 0, "no-op must not write the note");
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_abort_preserves_failing_item_and_successors() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, store) = engine_over(remote.clone());

        let a = test_note(0);
        let b = test_note(1);
        let c = test_note(2);
        store
            .write_notes(&[a.clone(), b.clone(), c.clone()])
            .unwrap();
        for n in [&a, &b, &c] {
            store
                .enqueue(Mutation::CreateNote { note: (*n).clone() })
                .unwrap();
        }

        let b_name = note_object_name(&b.id);
        remote.fail_puts_named(Some(b_name.as_str()));
        let outcome = engine.manual_sync().await;
        assert!(!outcome.success);

        // Item a was applied and dequeued; b and c remain, in order.
        let remaining = store.list_queue().unwrap();
        assert_eq!(remaining.len(), 2);
        let ids: Vec<Uuid> = remaining
            .iter()
            .map(|i| match &i.mutation {
                Mutation::CreateNote { note } => note.id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![b.id, c.id]);

        // Next attempt finishes the job.
        remote.fail_puts_named(None);
        let outcome = engine.manual_sync().await;
        assert!(outcome.success);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tag_mutations_rewrite_whole_collection() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, store) = engine_over(remote.clone());

        let t1 = test_tag(0);
        let t2 = test_tag(1);
        store.write_tags(&[t1.clone(), t2.clone()]).unwrap();
        store.enqueue(Mutation::CreateTag { tag: t1.clone() }).unwrap();
        store.enqueue(Mutation::CreateTag { tag: t2.clone() }).unwrap();

        let outcome = engine.manual_sync().await;
        assert!(outcome.success);

        let bytes = remote.object_bytes(TAGS_CONTAINER, TAGS_OBJECT).unwrap();
        let tags: Vec<Tag> = open(&bytes, EnvelopeKind::TagCollection).unwrap();
        assert_eq!(tags.len(), 2);

        // Deleting one rewrites the collection without it.
        store.enqueue(Mutation::DeleteTag { tag_id: t1.id }).unwrap();
        store.write_tags(&[t2.clone()]).unwrap();
        let outcome = engine.manual_sync().await;
        assert!(outcome.success);

        let bytes = remote.object_bytes(TAGS_CONTAINER, TAGS_OBJECT).unwrap();
        let tags: Vec<Tag> = open(&bytes, EnvelopeKind::TagCollection).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, t2.id);
    }

    #[tokio::test]
    async fn test_no_changes_performs_zero_remote_writes() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _store) = engine_over(remote.clone());

        // Establish freshness with an initial pull over an empty remote.
        engine.pull(true).await.unwrap();
        let writes_before = remote.write_count();

        let outcome = engine.manual_sync().await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "No changes");
        assert_eq!(remote.write_count(), writes_before);
    }

    #[tokio::test]
    async fn test_cheap_check_detects_count_drift() {
        let remote = Arc::new(MemoryRemote::new());
        let (device1, store1) = engine_over(remote.clone());
        let (device2, _store2) = engine_over(remote.clone());

        assert!(!device2.check_discrepancies(false).await);

        // Device 1 uploads a note; device 2's counts no longer match.
        let note = test_note(0);
        store1.write_notes(std::slice::from_ref(&note)).unwrap();
        store1.enqueue(Mutation::CreateNote { note }).unwrap();
        assert!(device1.manual_sync().await.success);

        assert!(device2.check_discrepancies(false).await);
    }

    #[tokio::test]
    async fn test_deep_check_detects_tag_edit_and_converges() {
        let remote = Arc::new(MemoryRemote::new());
        let (device1, store1) = engine_over(remote.clone());
        let (device2, store2) = engine_over(remote.clone());

        // Both devices start with the same synced tag.
        let tag = test_tag(0);
        store1.write_tags(std::slice::from_ref(&tag)).unwrap();
        store1.enqueue(Mutation::CreateTag { tag: tag.clone() }).unwrap();
        assert!(device1.manual_sync().await.success);
        assert!(device2.pull(true).await.unwrap());

        // Counts agree, so the cheap probe sees nothing.
        assert!(!device2.check_discrepancies(false).await);

        // Device 1 edits the tag's color and syncs.
        let mut edited = tag.clone();
        edited.color_enc.ct = "new-color".to_string();
        edited.updated_at = crate::models::next_updated_at(Some(edited.updated_at));
        store1.write_tags(std::slice::from_ref(&edited)).unwrap();
        store1
            .enqueue(Mutation::UpdateTag { tag: edited.clone() })
            .unwrap();
        assert!(device1.manual_sync().await.success);

        // Device 2's deep check spots the stamp mismatch and merges.
        assert!(device2.check_discrepancies(true).await);
        let tags = store2.read_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].color_enc.ct, "new-color");
        assert_eq!(tags[0].updated_at, edited.updated_at);
    }

    #[tokio::test]
    async fn test_deep_check_debounce_collapses_bursts() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(LocalStore::new(Arc::new(MemoryKvStore::new())));
        let engine = SyncEngine::new(
            store,
            remote.clone(),
            EventBus::new(),
            EngineConfig {
                deep_check_debounce_ms: 60_000,
                ..EngineConfig::default()
            },
        );

        // Make the remote divergent so a probe that runs would report true.
        let container = remote
            .find_or_create_container(NOTES_CONTAINER, None)
            .await
            .unwrap();
        let bytes = seal(EnvelopeKind::Note, &test_note(0)).unwrap();
        remote.put_object(&container, "x.json", &bytes).await.unwrap();

        assert!(engine.check_discrepancies(true).await);
        // Within the debounce window the burst collapses to one probe.
        assert!(!engine.check_discrepancies(true).await);
    }

    #[tokio::test]
    async fn test_pull_skipped_while_fresh() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _store) = engine_over(remote.clone());

        assert!(!engine.pull(true).await.unwrap());
        // Fresh and no drift: the second pull is a no-op.
        assert!(!engine.pull(false).await.unwrap());

        // Remote drift bypasses freshness via the cheap probe.
        let container = remote
            .find_or_create_container(NOTES_CONTAINER, None)
            .await
            .unwrap();
        let note = test_note(0);
        let bytes = seal(EnvelopeKind::Note, &note).unwrap();
        remote
            .put_object(&container, &note_object_name(&note.id), &bytes)
            .await
            .unwrap();
        assert!(engine.pull(false).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_failure_reports_no_divergence() {
        let remote = Arc::new(MemoryRemote::new());
        let (engine, _store) = engine_over(remote.clone());
        remote.set_offline(true);
        assert!(!engine.check_discrepancies(false).await);
        assert!(!engine.check_discrepancies(true).await);
    }

    #[tokio::test]
    async fn test_queue_integrity_error_surfaces() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.put("sync", "queue", &serde_json::json!({"items": [{"garbage": 1}]}))
            .unwrap();
        let store = Arc::new(LocalStore::new(kv));
        let engine = SyncEngine::new(
            store,
            Arc::new(MemoryRemote::new()),
            EventBus::new(),
            EngineConfig::default(),
        );

        let outcome = engine.manual_sync().await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("queue"));
    }
}
