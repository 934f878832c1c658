//! Last-write-wins merge.
//!
//! Union by id; when an id exists on both sides, the entity with the
//! later `updatedAt` wins. This is the complete conflict policy — true
//! concurrent edits can lose data, and that weak-consistency trade-off
//! is deliberate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Note, Tag};

/// An entity the merge can reconcile by id and timestamp
pub trait Mergeable {
    fn id(&self) -> Uuid;
    fn updated_at(&self) -> DateTime<Utc>;
}

impl Mergeable for Note {
    fn id(&self) -> Uuid {
        self.id
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Mergeable for Tag {
    fn id(&self) -> Uuid {
        self.id
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Merge a remote collection into a local one.
///
/// Local order is preserved for surviving local entities; remote-only
/// entities are appended. On an id collision the later `updatedAt`
/// wins; a tie keeps the local copy.
pub fn merge_data<T: Mergeable + Clone>(local: &[T], remote: &[T]) -> Vec<T> {
    let mut remote_by_id: HashMap<Uuid, &T> = remote.iter().map(|e| (e.id(), e)).collect();

    let mut merged: Vec<T> = Vec::with_capacity(local.len() + remote.len());
    for entity in local {
        match remote_by_id.remove(&entity.id()) {
            Some(theirs) if theirs.updated_at() > entity.updated_at() => {
                merged.push(theirs.clone());
            }
            _ => merged.push(entity.clone()),
        }
    }

    // Remaining remote entries have no local counterpart.
    for entity in remote {
        if remote_by_id.contains_key(&entity.id()) {
            merged.push(entity.clone());
        }
    }

    merged
}
