//! In-process event bus (§4.7).
//!
//! Single-threaded, synchronous, publish-order dispatch. A panic inside one
//! subscriber's callback must not prevent later subscribers from receiving
//! the event (§8 property 9), so each callback is isolated with
//! `catch_unwind`.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Events published by the engine, matching the list in §4.7.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A server's reachability changed.
    ServerAvailabilityChanged { domain: String, available: bool },
    /// An account's socket session opened.
    AccountConnectionOpened { account_id: String },
    /// An account's socket session closed.
    AccountConnectionClosed { account_id: String },
    /// An account's socket session received a message.
    AccountMessageReceived { account_id: String },
    /// An account's local record was updated.
    AccountUpdated { account_id: String },
    /// An account was deleted (logged out).
    AccountDeleted { account_id: String },
    /// A workspace was created.
    WorkspaceCreated { workspace_id: String },
    /// A workspace's local record was updated.
    WorkspaceUpdated { workspace_id: String },
    /// A workspace was deleted.
    WorkspaceDeleted { workspace_id: String },
    /// A node was created.
    NodeCreated { workspace_id: String, node_id: String },
    /// A node was updated (attributes or document content).
    NodeUpdated { workspace_id: String, node_id: String },
    /// A node was deleted.
    NodeDeleted { workspace_id: String, node_id: String },
    /// A mutation was enqueued for sync.
    MutationEnqueued { workspace_id: String, mutation_id: String },
    /// A mutation was successfully applied by the server.
    MutationCompleted { workspace_id: String, mutation_id: String },
    /// A mutation failed permanently (dead-lettered).
    MutationFailed { workspace_id: String, mutation_id: String, reason: String },
}

/// Opaque handle identifying one subscription. Unsubscribing twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Synchronous pub/sub dispatcher.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriptionId, Callback>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, invoked synchronously for every subsequent `publish`.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap()
            .insert(id, Arc::new(callback));
        id
    }

    /// Remove a subscription. Idempotent: unsubscribing an unknown or
    /// already-removed id is not an error.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().unwrap().remove(&id);
    }

    /// Publish an event to all current subscribers, in an unspecified but
    /// stable iteration order captured at the start of this call (so an
    /// unsubscribe triggered by one callback never skips deliveries already
    /// in flight for this publish).
    pub fn publish(&self, event: DomainEvent) {
        let callbacks: Vec<Callback> = self.subscribers.read().unwrap().values().cloned().collect();
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                log::error!("event bus subscriber panicked while handling {event:?}");
            }
        }
    }

    /// Number of currently active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn subscribers_receive_events_in_publish_order() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        bus.subscribe(move |event| {
            if let DomainEvent::NodeCreated { node_id, .. } = event {
                received2.lock().unwrap().push(node_id.clone());
            }
        });

        bus.publish(DomainEvent::NodeCreated {
            workspace_id: "w1".into(),
            node_id: "n1".into(),
        });
        bus.publish(DomainEvent::NodeCreated {
            workspace_id: "w1".into(),
            node_id: "n2".into(),
        });

        assert_eq!(*received.lock().unwrap(), vec!["n1", "n2"]);
    }

    #[test]
    fn a_panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();

        bus.subscribe(|_event| panic!("boom"));
        bus.subscribe(move |_event| {
            *ran2.lock().unwrap() = true;
        });

        bus.publish(DomainEvent::AccountUpdated {
            account_id: "a1".into(),
        });

        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_stops_future_deliveries() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        let id = bus.subscribe(move |_event| {
            *count2.lock().unwrap() += 1;
        });

        bus.publish(DomainEvent::AccountUpdated {
            account_id: "a1".into(),
        });
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        bus.publish(DomainEvent::AccountUpdated {
            account_id: "a1".into(),
        });

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
