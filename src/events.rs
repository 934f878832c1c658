//! Typed publish/subscribe channel for engine notifications.
//!
//! Subscriptions have an explicit lifecycle: `subscribe` attaches,
//! dropping the [`Subscription`] (or calling `detach`) removes the
//! listener. Dead senders are pruned on publish, so nothing leaks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::crypto::LockState;
use crate::models::EntityKind;

/// Notifications published by the session and sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A local or merged write changed entities of this kind
    EntitiesChanged { kind: EntityKind },
    /// The lock state machine moved
    LockStateChanged { state: LockState },
    /// A sync operation started or finished
    SyncStateChanged { syncing: bool },
}

struct Listener {
    id: u64,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Registry {
    listeners: Vec<Listener>,
}

/// Publish side of the channel. Cheap to clone.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .lock()
            .unwrap()
            .listeners
            .push(Listener { id, sender: tx });
        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to every live listener, pruning closed ones
    pub fn publish(&self, event: ChangeEvent) {
        let mut registry = self.registry.lock().unwrap();
        registry
            .listeners
            .retain(|l| l.sender.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().unwrap().listeners.len()
    }
}

/// Receive side of one subscription. Detaches on drop.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    registry: std::sync::Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Await the next event; `None` once detached and drained
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Take an already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Explicitly remove this listener
    pub fn detach(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().unwrap().listeners.retain(|l| l.id != self.id);
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(ChangeEvent::EntitiesChanged { kind: EntityKind::Note });
        assert_eq!(
            sub.recv().await,
            Some(ChangeEvent::EntitiesChanged { kind: EntityKind::Note })
        );
    }

    #[tokio::test]
    async fn test_detach_removes_listener() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert_eq!(bus.listener_count(), 1);

        sub.detach();
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_listener() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.listener_count(), 1);
        }
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(ChangeEvent::SyncStateChanged { syncing: true });
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
    }
}
