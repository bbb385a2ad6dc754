//! Host construction options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::HostError;

/// Default delay between handshake attempts, in milliseconds.
pub const HANDSHAKE_INTERVAL_MS: u64 = 500;

/// Default number of handshake attempts.
pub const MAX_HANDSHAKE_ATTEMPTS: u32 = 5;

/// Retry policy for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeOptions {
    /// Delay between attempts.
    pub interval_ms: u64,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            interval_ms: HANDSHAKE_INTERVAL_MS,
            max_attempts: MAX_HANDSHAKE_ATTEMPTS,
        }
    }
}

impl HandshakeOptions {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Cosmetic details of the embedded frame. No protocol effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameInfo {
    /// Mount target of the embed.
    pub container: String,
    /// CSS classes applied to the embed.
    pub class_list: Vec<String>,
    /// Embed identifier.
    pub name: Option<String>,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            container: "body".to_string(),
            class_list: Vec::new(),
            name: None,
        }
    }
}

/// Configuration for connecting to a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Source URL of the child. Its origin is the handshake target.
    pub url: String,

    /// Defaults merged into the child's model at handshake time.
    #[serde(default)]
    pub model: Map<String, Value>,

    #[serde(flatten)]
    pub frame: FrameInfo,

    #[serde(default)]
    pub handshake: HandshakeOptions,
}

impl HostConfig {
    /// Create a config for the given child URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: Map::new(),
            frame: FrameInfo::default(),
            handshake: HandshakeOptions::default(),
        }
    }

    /// Set a model default.
    #[must_use]
    pub fn with_model_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.model.insert(key.into(), value.into());
        self
    }

    /// Replace the model defaults.
    #[must_use]
    pub fn with_model(mut self, model: Map<String, Value>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.frame.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.frame.container = container.into();
        self
    }

    #[must_use]
    pub fn with_class_list<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.frame.class_list = classes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_handshake(mut self, handshake: HandshakeOptions) -> Self {
        self.handshake = handshake;
        self
    }

    /// Origin the handshake is addressed to, derived from `url`.
    ///
    /// # Errors
    /// Returns error if `url` is not an absolute URL.
    pub fn child_origin(&self) -> Result<String, HostError> {
        resolve_origin(&self.url)
    }
}

/// Serialize the origin (`scheme://host[:port]`) of a URL.
///
/// Default ports are omitted. URLs without a tuple origin serialize to
/// `"null"`.
///
/// # Errors
/// Returns error if `url` cannot be parsed.
pub fn resolve_origin(url: &str) -> Result<String, HostError> {
    let parsed = Url::parse(url).map_err(|e| HostError::InvalidUrl(format!("{url}: {e}")))?;
    Ok(parsed.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_origin() {
        assert_eq!(
            resolve_origin("https://child.example/app/index.html?x=1#top").unwrap(),
            "https://child.example"
        );
        assert_eq!(
            resolve_origin("http://localhost:8080/frame").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            resolve_origin("https://child.example:443/").unwrap(),
            "https://child.example"
        );
        assert_eq!(resolve_origin("data:text/html,hi").unwrap(), "null");
    }

    #[test]
    fn test_relative_url_is_rejected() {
        assert!(matches!(
            resolve_origin("/child.html"),
            Err(HostError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = HostConfig::new("https://child.example");
        assert_eq!(config.handshake.interval(), Duration::from_millis(500));
        assert_eq!(config.handshake.max_attempts, 5);
        assert_eq!(config.frame.container, "body");
        assert!(config.model.is_empty());
    }

    #[test]
    fn test_deserialize_with_partial_options() {
        let config: HostConfig = serde_json::from_value(json!({
            "url": "https://child.example/embed",
            "model": { "greeting": "hi" },
            "name": "payments",
            "class_list": ["wide"],
            "handshake": { "max_attempts": 8 }
        }))
        .unwrap();

        assert_eq!(config.model.get("greeting"), Some(&json!("hi")));
        assert_eq!(config.frame.name.as_deref(), Some("payments"));
        assert_eq!(config.frame.container, "body");
        assert_eq!(config.frame.class_list, vec!["wide".to_string()]);
        assert_eq!(config.handshake.max_attempts, 8);
        assert_eq!(config.handshake.interval_ms, 500);
    }

    #[test]
    fn test_builder() {
        let config = HostConfig::new("https://child.example")
            .with_model_value("greeting", "hi")
            .with_name("frame-1")
            .with_container("#mount")
            .with_class_list(["a", "b"]);
        assert_eq!(config.model.get("greeting"), Some(&json!("hi")));
        assert_eq!(config.frame.container, "#mount");
        assert_eq!(config.frame.class_list.len(), 2);
    }
}
