//! Named-event dispatch registry.
//!
//! Routes decoded inbound frames to subscribers by event name. Handlers
//! for one event run in registration order; a panicking handler is
//! isolated so the rest still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

type EventHandler = dyn Fn(&Value) + Send + Sync;

/// Token returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Subscribe/unsubscribe/emit registry for named events.
#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Arc<EventHandler>)>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered handler. Returns whether anything
    /// was removed.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Invoke every handler registered for `event`, in registration order.
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let snapshot: Vec<Arc<EventHandler>> = {
            let handlers = self.handlers.read();
            match handlers.get(event) {
                Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
                None => return 0,
            }
        };

        let mut invoked = 0;
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                warn!(event, "Event handler panicked");
            }
            invoked += 1;
        }
        invoked
    }

    /// Number of handlers currently registered for an event.
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            registry.on("tick", move |_| seen.lock().push(tag));
        }

        let invoked = registry.emit("tick", &json!({}));
        assert_eq!(invoked, 3);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_only_target() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = seen.clone();
        let a = registry.on("tick", move |_| seen_a.lock().push("a"));
        let seen_b = seen.clone();
        let _b = registry.on("tick", move |_| seen_b.lock().push("b"));

        assert!(registry.off("tick", a));
        assert!(!registry.off("tick", a), "second removal must be a no-op");
        assert_eq!(registry.handler_count("tick"), 1);

        registry.emit("tick", &json!({}));
        assert_eq!(*seen.lock(), vec!["b"]);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        registry.on("tick", |_| panic!("boom"));
        let seen_ok = seen.clone();
        registry.on("tick", move |_| seen_ok.lock().push("survivor"));

        let invoked = registry.emit("tick", &json!({}));
        assert_eq!(invoked, 2);
        assert_eq!(*seen.lock(), vec!["survivor"]);
    }

    #[test]
    fn test_emit_unknown_event_is_noop() {
        let registry = EventRegistry::new();
        assert_eq!(registry.emit("nothing", &json!({})), 0);
        assert_eq!(registry.handler_count("nothing"), 0);
    }

    #[test]
    fn test_handlers_receive_payload() {
        let registry = EventRegistry::new();
        let price = Arc::new(Mutex::new(0.0));
        let price_ref = price.clone();
        registry.on("quote", move |frame| {
            *price_ref.lock() = frame["price"].as_f64().unwrap_or(0.0);
        });

        registry.emit("quote", &json!({"price": 101.25}));
        assert_eq!(*price.lock(), 101.25);
    }
}
