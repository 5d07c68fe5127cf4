//! Synchronous, in-process event bus.
//!
//! `publish` delivers on the calling thread, in listener-registration order.
//! The listener list is snapshotted at publish time: registration changes
//! made concurrently (or by a listener during delivery) never skip or
//! double-deliver to listeners unaffected by the change. A listener that
//! panics is isolated - the panic is caught and logged, and delivery
//! continues with the next listener.
//!
//! No persistence, no delivery guarantees past the currently registered set:
//! fire-and-forget.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What an event reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Module status changed (payload carries the new state).
    Status,
    /// Module recorded an error.
    Error,
    /// Module produced a data sample.
    Data,
    /// Command progress (payload carries the command id and state).
    Command,
    /// Registry: a module record was added.
    ModuleAdded,
    /// Registry: a module record was removed.
    ModuleRemoved,
}

/// Immutable event value flowing over the bus.
#[derive(Clone, Debug)]
pub struct Event {
    /// Module id (or `registry`) that produced the event.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(source: impl Into<String>, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }
}

/// Receives events synchronously on the publishing thread.
///
/// Implementations must not block for long - they run inline in `publish`.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);

    /// Name used in per-listener failure logs.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Synchronous publish/subscribe channel.
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; it observes events published after this call.
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener; returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Deliver `event` to every listener registered at this moment, in
    /// registration order. Delivery happens outside the listener-list lock,
    /// so listeners may subscribe/unsubscribe reentrantly.
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<(ListenerId, Arc<dyn EventListener>)> =
            self.listeners.read().clone();
        for (_, listener) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if let Err(panic) = result {
                tracing::warn!(
                    listener = listener.name(),
                    source = %event.source,
                    kind = ?event.kind,
                    panic = ?panic_message(&panic),
                    "Event listener panicked during delivery"
                );
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: &Event) {
            self.seen.lock().push(format!("{}:{}", self.tag, event.source));
        }
        fn name(&self) -> &str {
            self.tag
        }
    }

    struct Panicker;

    impl EventListener for Panicker {
        fn on_event(&self, _event: &Event) {
            panic!("listener blew up");
        }
        fn name(&self) -> &str {
            "panicker"
        }
    }

    fn data_event(source: &str) -> Event {
        Event::new(source, EventKind::Data, json!({"v": 1}))
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(Recorder { tag: "first", seen: seen.clone() }));
        bus.subscribe(Arc::new(Recorder { tag: "second", seen: seen.clone() }));

        bus.publish(&data_event("s1"));

        assert_eq!(*seen.lock(), ["first:s1", "second:s1"]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(Panicker));
        bus.subscribe(Arc::new(Recorder { tag: "after", seen: seen.clone() }));

        bus.publish(&data_event("s1"));

        assert_eq!(*seen.lock(), ["after:s1"]);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = bus.subscribe(Arc::new(Recorder { tag: "gone", seen: seen.clone() }));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&data_event("s1"));

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_delivery() {
        struct SelfRemover {
            bus: Arc<EventBus>,
            id: Mutex<Option<ListenerId>>,
            fired: Arc<Mutex<usize>>,
        }

        impl EventListener for SelfRemover {
            fn on_event(&self, _event: &Event) {
                *self.fired.lock() += 1;
                if let Some(id) = self.id.lock().take() {
                    self.bus.unsubscribe(id);
                }
            }
        }

        let bus = Arc::new(EventBus::new());
        let fired = Arc::new(Mutex::new(0));
        let listener = Arc::new(SelfRemover {
            bus: bus.clone(),
            id: Mutex::new(None),
            fired: fired.clone(),
        });
        let id = bus.subscribe(listener.clone());
        *listener.id.lock() = Some(id);

        bus.publish(&data_event("s1"));
        bus.publish(&data_event("s1"));

        assert_eq!(*fired.lock(), 1);
        assert_eq!(bus.listener_count(), 0);
    }
}
