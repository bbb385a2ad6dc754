//! Event callbacks registered on the host side.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde_json::Value;

/// Callback invoked with the emitted data.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Mapping from event name to callbacks, in registration order.
///
/// Registering the same callback twice invokes it twice.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `name`.
    pub fn on<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.on_handler(name, Arc::new(handler));
    }

    /// Append a shared callback for `name`.
    pub fn on_handler(&self, name: impl Into<String>, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.into())
            .or_default()
            .push(handler);
    }

    /// Invoke every callback registered for `name`. Returns how many ran.
    pub fn emit(&self, name: &str, data: &Value) -> usize {
        // Snapshot so callbacks may register more handlers.
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();

        for handler in &handlers {
            handler(data.clone());
        }
        handlers.len()
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_in_registration_order() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            registry.on("ping", move |data| log.lock().unwrap().push((tag, data)));
        }

        assert_eq!(registry.emit("ping", &json!(7)), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", json!(7)), ("second", json!(7))]
        );
    }

    #[test]
    fn test_duplicate_handler_fires_twice() {
        let registry = EventRegistry::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let handler: EventHandler = Arc::new(move |_| *counter.lock().unwrap() += 1);

        registry.on_handler("tick", Arc::clone(&handler));
        registry.on_handler("tick", handler);
        registry.emit("tick", &Value::Null);

        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let registry = EventRegistry::new();
        registry.on("ping", |_| panic!("must not run"));
        assert_eq!(registry.emit("pong", &Value::Null), 0);
    }

    #[test]
    fn test_clear() {
        let registry = EventRegistry::new();
        registry.on("ping", |_| {});
        registry.clear();
        assert_eq!(registry.emit("ping", &Value::Null), 0);
    }
}
