//! Child-side capability map.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use serde_json::{Map, Value};

/// Future produced by resolving a model entry.
pub type ModelFuture = BoxFuture<'static, Value>;

pub type Callable = Arc<dyn Fn(Value) -> ModelFuture + Send + Sync>;

/// A model property: a plain value or a callable.
///
/// Callables receive the `data` of a `call`, or `null` when resolved by a
/// `request`.
#[derive(Clone)]
pub enum ModelEntry {
    Value(Value),
    Callable(Callable),
}

impl ModelEntry {
    /// Wrap a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(move |data| futures::future::ready(f(data)).boxed()))
    }

    /// Wrap an asynchronous function.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        Self::Callable(Arc::new(move |data| f(data).boxed()))
    }

    /// Plain value, if this entry is one.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Callable(_) => None,
        }
    }

    #[must_use]
    pub const fn is_callable(&self) -> bool {
        matches!(self, Self::Callable(_))
    }

    /// Resolve through the common asynchronous path.
    fn resolve(&self) -> ModelFuture {
        match self {
            Self::Value(value) => futures::future::ready(value.clone()).boxed(),
            Self::Callable(f) => f(Value::Null),
        }
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Callable(_) => f.write_str("Callable"),
        }
    }
}

impl From<Value> for ModelEntry {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// The child's exposed key/value surface.
#[derive(Debug, Clone, Default)]
pub struct Model {
    entries: HashMap<String, ModelEntry>,
}

impl Model {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, ModelEntry::Value(value.into()));
        self
    }

    /// Add a synchronous function.
    #[must_use]
    pub fn with_fn<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.insert(key, ModelEntry::sync(f));
        self
    }

    /// Add an asynchronous function.
    #[must_use]
    pub fn with_async_fn<F, Fut>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.insert(key, ModelEntry::async_fn(f));
        self
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, entry: ModelEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Get an entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ModelEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shallow-merge host-provided defaults, overwriting existing keys.
    pub fn merge_defaults(&mut self, defaults: Map<String, Value>) {
        for (key, value) in defaults {
            self.entries.insert(key, ModelEntry::Value(value));
        }
    }

    /// Resolve a property for a `request`.
    ///
    /// Missing keys resolve to `null`.
    #[must_use]
    pub fn resolve(&self, key: &str) -> ModelFuture {
        self.entries.get(key).map_or_else(
            || futures::future::ready(Value::Null).boxed(),
            ModelEntry::resolve,
        )
    }

    /// Invoke a callable for a `call`.
    ///
    /// Returns `None` when the key is missing or holds a plain value.
    #[must_use]
    pub fn call(&self, key: &str, data: Value) -> Option<ModelFuture> {
        match self.entries.get(key)? {
            ModelEntry::Callable(f) => Some(f(data)),
            ModelEntry::Value(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_value_and_getter_resolve_alike() {
        let model = Model::new()
            .with_value("plain", 42)
            .with_fn("getter", |_| json!(42))
            .with_async_fn("deferred", |_| async {
                tokio::task::yield_now().await;
                json!(42)
            });

        assert_eq!(model.resolve("plain").await, json!(42));
        assert_eq!(model.resolve("getter").await, json!(42));
        assert_eq!(model.resolve("deferred").await, json!(42));
    }

    #[tokio::test]
    async fn test_missing_key_resolves_null() {
        assert_eq!(Model::new().resolve("nope").await, Value::Null);
    }

    #[tokio::test]
    async fn test_call_passes_data() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let model = Model::new().with_fn("add", move |data| {
            let n = data.as_u64().unwrap_or(0);
            counter.fetch_add(usize::try_from(n).unwrap_or(0), Ordering::SeqCst);
            Value::Null
        });

        model.call("add", json!(5)).unwrap().await;
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_call_misses_are_none() {
        let model = Model::new().with_value("plain", 1);
        assert!(model.call("plain", Value::Null).is_none());
        assert!(model.call("missing", Value::Null).is_none());
    }

    #[test]
    fn test_merge_defaults_overwrites_per_key() {
        let mut model = Model::new()
            .with_value("greeting", "hello")
            .with_value("count", 1);
        let defaults = json!({ "greeting": "hi" }).as_object().cloned().unwrap();
        model.merge_defaults(defaults);

        assert_eq!(model.len(), 2);
        assert_eq!(model.get("greeting").and_then(ModelEntry::as_value), Some(&json!("hi")));
        assert_eq!(model.get("count").and_then(ModelEntry::as_value), Some(&json!(1)));
    }

    #[test]
    fn test_merge_replaces_callable_with_value() {
        let mut model = Model::new().with_fn("title", |_| json!("child"));
        model.merge_defaults(json!({ "title": "host" }).as_object().cloned().unwrap());
        assert!(!model.get("title").unwrap().is_callable());
    }
}
