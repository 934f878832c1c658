use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Note, Tag};

/// A queued local mutation awaiting remote application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    CreateNote { note: Note },
    UpdateNote { note: Note },
    DeleteNote { note_id: Uuid },
    CreateTag { tag: Tag },
    UpdateTag { tag: Tag },
    DeleteTag { tag_id: Uuid },
}

impl Mutation {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateNote { .. } => "createNote",
            Mutation::UpdateNote { .. } => "updateNote",
            Mutation::DeleteNote { .. } => "deleteNote",
            Mutation::CreateTag { .. } => "createTag",
            Mutation::UpdateTag { .. } => "updateTag",
            Mutation::DeleteTag { .. } => "deleteTag",
        }
    }
}

/// A single queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationQueueItem {
    /// Unique ID for this queue entry
    pub id: Uuid,
    pub mutation: Mutation,
    /// When this item was queued
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO queue of pending mutations.
///
/// Append-only on the producer side; entries leave the queue only on
/// successful remote application or benign not-found. Order is the
/// order mutations must reach the remote in.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MutationQueue {
    pub items: Vec<MutationQueueItem>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append a mutation, returning the new entry's id
    pub fn enqueue(&mut self, mutation: Mutation) -> Uuid {
        let id = Uuid::new_v4();
        self.items.push(MutationQueueItem {
            id,
            mutation,
            enqueued_at: Utc::now(),
        });
        id
    }

    /// Remove a completed entry
    pub fn dequeue(&mut self, id: Uuid) {
        self.items.retain(|item| item.id != id);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_preserved() {
        let mut queue = MutationQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.enqueue(Mutation::DeleteNote { note_id: a });
        queue.enqueue(Mutation::DeleteNote { note_id: b });

        let ids: Vec<Uuid> = queue
            .items
            .iter()
            .map(|i| match &i.mutation {
                Mutation::DeleteNote { note_id } => *note_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_dequeue_removes_only_target() {
        let mut queue = MutationQueue::new();
        let first = queue.enqueue(Mutation::DeleteNote { note_id: Uuid::new_v4() });
        let second = queue.enqueue(Mutation::DeleteNote { note_id: Uuid::new_v4() });

        queue.dequeue(first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.items[0].id, second);
    }

    #[test]
    fn test_serde_roundtrip_preserves_order() {
        let mut queue = MutationQueue::new();
        for _ in 0..5 {
            queue.enqueue(Mutation::DeleteTag { tag_id: Uuid::new_v4() });
        }
        let json = serde_json::to_string(&queue).unwrap();
        let restored: MutationQueue = serde_json::from_str(&json).unwrap();
        let before: Vec<Uuid> = queue.items.iter().map(|i| i.id).collect();
        let after: Vec<Uuid> = restored.items.iter().map(|i| i.id).collect();
        assert_eq!(before, after);
    }
}
