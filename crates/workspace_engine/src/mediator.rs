//! Mediator (§4.8): a registry of query handlers, each keyed by
//! `(handlerId, input)`, kept consistent with the store by replaying domain
//! events through each handler's own change-detection logic rather than
//! blindly invalidating everything on every event.
//!
//! Generalizes the event bus's subscription bookkeeping (opaque ids,
//! `RwLock<HashMap<...>>`) to cached *query results*: a host shell subscribes
//! a window id to "the children of node X", gets the current answer
//! immediately, and is handed the same cached value as every other window
//! asking the same question — the subscription is only dropped once its last
//! window id unsubscribes. The mediator self-subscribes to the event bus at
//! construction, so every published event is automatically fanned out to the
//! handlers that might care.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde_json::Value;

use crate::events::{DomainEvent, EventBus, SubscriptionId};

/// Outcome of asking a handler whether an event affects one of its cached queries.
pub struct ChangeCheck {
    pub has_changes: bool,
    pub new_output: Option<Value>,
}

impl ChangeCheck {
    /// The event doesn't affect this query; the cached output stands.
    pub fn unchanged() -> Self {
        Self {
            has_changes: false,
            new_output: None,
        }
    }

    /// The event affects this query; `new_output` replaces the cached value.
    pub fn changed(new_output: Value) -> Self {
        Self {
            has_changes: true,
            new_output: Some(new_output),
        }
    }
}

/// One registered query (§4.8): runs against the store on demand, and knows
/// how to decide whether a domain event could change its own output.
pub trait QueryHandler: Send + Sync {
    /// Run the query fresh against the store.
    fn execute(&self, input: &Value) -> Value;

    /// Given an event and this query's last-known output, decide whether the
    /// query needs to be recomputed, and what the new output is if so.
    fn check_for_changes(&self, event: &DomainEvent, input: &Value, last_output: &Value) -> ChangeCheck;
}

/// One pushed update a subscribing window should receive (§4.8: "pushes it
/// to all subscribing windows"). The mediator has no IPC transport of its
/// own, so these accumulate until the host shell drains them.
#[derive(Debug, Clone)]
pub struct Notification {
    pub handler_id: String,
    pub window_id: String,
    pub input: Value,
    pub output: Value,
}

struct Subscription {
    input: Value,
    last_output: Value,
    window_ids: HashSet<String>,
}

type SubscriptionKey = (String, String);

fn subscription_key(handler_id: &str, input: &Value) -> SubscriptionKey {
    (handler_id.to_string(), input.to_string())
}

/// Registry of query handlers plus their live subscriptions.
pub struct Mediator {
    handlers: RwLock<HashMap<String, Box<dyn QueryHandler>>>,
    subscriptions: RwLock<HashMap<SubscriptionKey, Subscription>>,
    notifications: Mutex<Vec<Notification>>,
    events: Arc<EventBus>,
    event_subscription: Mutex<Option<SubscriptionId>>,
}

impl Mediator {
    /// Create an empty registry, self-subscribed to `events` so every
    /// published domain event is automatically fanned out to `dispatch`.
    pub fn new(events: Arc<EventBus>) -> Arc<Self> {
        let mediator = Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
            events,
            event_subscription: Mutex::new(None),
        });

        let weak: Weak<Mediator> = Arc::downgrade(&mediator);
        let subscription_id = mediator.events.subscribe(move |event| {
            if let Some(mediator) = weak.upgrade() {
                mediator.dispatch(event);
            }
        });
        *mediator.event_subscription.lock().unwrap() = Some(subscription_id);

        mediator
    }

    /// Register a query handler under `handler_id`, replacing any prior
    /// handler of the same id.
    pub fn register_handler(&self, handler_id: impl Into<String>, handler: impl QueryHandler + 'static) {
        self.handlers
            .write()
            .unwrap()
            .insert(handler_id.into(), Box::new(handler));
    }

    /// Run `handler_id`'s query directly against `input`, bypassing the
    /// subscription cache (§4.8 `execute`).
    pub fn execute(&self, handler_id: &str, input: &Value) -> Option<Value> {
        let handlers = self.handlers.read().unwrap();
        handlers.get(handler_id).map(|h| h.execute(input))
    }

    /// Subscribe `window_id` to `(handler_id, input)`, returning the current
    /// output. Computes it on the first subscriber; later subscribers to the
    /// same `(handler_id, input)` reuse the cached value.
    pub fn subscribe(&self, handler_id: &str, input: &Value, window_id: &str) -> Option<Value> {
        let key = subscription_key(handler_id, input);

        {
            let mut subs = self.subscriptions.write().unwrap();
            if let Some(sub) = subs.get_mut(&key) {
                sub.window_ids.insert(window_id.to_string());
                return Some(sub.last_output.clone());
            }
        }

        let output = self.execute(handler_id, input)?;
        let mut window_ids = HashSet::new();
        window_ids.insert(window_id.to_string());
        self.subscriptions.write().unwrap().insert(
            key,
            Subscription {
                input: input.clone(),
                last_output: output.clone(),
                window_ids,
            },
        );
        Some(output)
    }

    /// Release `window_id`'s subscription to `(handler_id, input)`. Drops
    /// the subscription entirely once no window id remains (§4.8: "reference
    /// counted per window id").
    pub fn unsubscribe(&self, handler_id: &str, input: &Value, window_id: &str) {
        let key = subscription_key(handler_id, input);
        let mut subs = self.subscriptions.write().unwrap();
        if let Some(sub) = subs.get_mut(&key) {
            sub.window_ids.remove(window_id);
            if sub.window_ids.is_empty() {
                subs.remove(&key);
            }
        }
    }

    /// Fan an event out to every live subscription, asking its handler
    /// whether the event could change the cached output. Changed
    /// subscriptions are updated in place and queue one notification per
    /// subscribing window (§4.8).
    pub fn dispatch(&self, event: &DomainEvent) {
        let handlers = self.handlers.read().unwrap();
        let mut subs = self.subscriptions.write().unwrap();
        let mut pushed = Vec::new();

        for ((handler_id, _), sub) in subs.iter_mut() {
            let Some(handler) = handlers.get(handler_id) else {
                continue;
            };
            let check = handler.check_for_changes(event, &sub.input, &sub.last_output);
            if let (true, Some(new_output)) = (check.has_changes, check.new_output) {
                sub.last_output = new_output.clone();
                for window_id in &sub.window_ids {
                    pushed.push(Notification {
                        handler_id: handler_id.clone(),
                        window_id: window_id.clone(),
                        input: sub.input.clone(),
                        output: new_output.clone(),
                    });
                }
            }
        }

        if !pushed.is_empty() {
            self.notifications.lock().unwrap().extend(pushed);
        }
    }

    /// Drain and return every notification queued since the last drain.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications.lock().unwrap())
    }

    /// Number of distinct `(handlerId, input)` subscriptions currently live.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().unwrap().len()
    }
}

impl Drop for Mediator {
    fn drop(&mut self) {
        if let Some(id) = self.event_subscription.lock().unwrap().take() {
            self.events.unsubscribe(id);
        }
    }
}
