//! In-process transport modelled on window `postMessage`.
//!
//! Every context has an inbox shared by all senders. Payloads posted before
//! a context subscribes are lost, the same way a frame that has not loaded
//! yet misses messages.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use framelink_core::{ANY_ORIGIN, Channel, ChannelError, Inbound, InboundStream};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Inbox capacity per context.
const INBOX_CAPACITY: usize = 1024;

struct Slot {
    origin: String,
    sender: broadcast::Sender<Inbound>,
}

type Contexts = Arc<RwLock<HashMap<Uuid, Slot>>>;

/// A set of contexts that can post to each other.
#[derive(Clone, Default)]
pub struct MemoryBus {
    contexts: Contexts,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new context with the given origin.
    #[must_use]
    pub fn open(&self, origin: impl Into<String>) -> MemoryContext {
        let id = Uuid::new_v4();
        let (sender, _) = broadcast::channel(INBOX_CAPACITY);
        let origin = origin.into();
        tracing::trace!(%id, %origin, "Opening context");

        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Slot { origin, sender });

        MemoryContext {
            id,
            contexts: Arc::clone(&self.contexts),
        }
    }

    /// Number of open contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One context on a [`MemoryBus`].
#[derive(Clone)]
pub struct MemoryContext {
    id: Uuid,
    contexts: Contexts,
}

impl MemoryContext {
    /// Context identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current origin, or `None` once closed.
    #[must_use]
    pub fn origin(&self) -> Option<String> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.id)
            .map(|slot| slot.origin.clone())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.origin().is_some()
    }

    /// Change this context's origin, as a redirect would.
    pub fn navigate(&self, origin: impl Into<String>) {
        if let Some(slot) = self
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&self.id)
        {
            slot.origin = origin.into();
        }
    }

    /// Remove this context from the bus. Its subscriptions end.
    pub fn close(&self) {
        tracing::trace!(id = %self.id, "Closing context");
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }

    /// Subscribe to this context's inbox.
    #[must_use]
    pub fn subscribe(&self) -> InboundStream {
        let receiver = self
            .contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.id)
            .map(|slot| slot.sender.subscribe());

        match receiver {
            Some(rx) => BroadcastStream::new(rx)
                .filter_map(|res| async move {
                    res.map_err(|e| tracing::warn!("Inbox lagged: {e}")).ok()
                })
                .boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    /// Post a payload to `target`, sent from this context's origin.
    ///
    /// # Errors
    /// Returns error if either context is closed.
    pub fn post(
        &self,
        target: &Self,
        payload: Value,
        target_origin: &str,
    ) -> Result<(), ChannelError> {
        let contexts = self.contexts.read().unwrap_or_else(PoisonError::into_inner);
        let sender_origin = contexts
            .get(&self.id)
            .map(|slot| slot.origin.clone())
            .ok_or(ChannelError::Closed)?;
        let slot = contexts.get(&target.id).ok_or(ChannelError::Closed)?;

        if target_origin != ANY_ORIGIN && target_origin != slot.origin {
            tracing::debug!(
                target_origin,
                actual = %slot.origin,
                "Target origin mismatch, dropping payload"
            );
            return Ok(());
        }

        if slot.sender.send(Inbound::new(sender_origin, payload)).is_err() {
            tracing::trace!(target = %target.id, "No listener, payload lost");
        }
        Ok(())
    }

    /// Channel that posts to `remote` and listens on this context.
    #[must_use]
    pub fn channel_to(&self, remote: &Self) -> MemoryChannel {
        MemoryChannel {
            local: self.clone(),
            remote: remote.clone(),
        }
    }
}

/// [`Channel`] between two contexts of a [`MemoryBus`].
#[derive(Clone)]
pub struct MemoryChannel {
    local: MemoryContext,
    remote: MemoryContext,
}

impl MemoryChannel {
    /// The listening side.
    #[must_use]
    pub const fn local(&self) -> &MemoryContext {
        &self.local
    }

    /// The posting target.
    #[must_use]
    pub const fn remote(&self) -> &MemoryContext {
        &self.remote
    }
}

impl Channel for MemoryChannel {
    fn post(&self, payload: Value, target_origin: &str) -> Result<(), ChannelError> {
        self.local.post(&self.remote, payload, target_origin)
    }

    fn subscribe(&self) -> InboundStream {
        self.local.subscribe()
    }

    fn close(&self) {
        self.remote.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_delivers_with_sender_origin() {
        let bus = MemoryBus::new();
        let host = bus.open("https://host.example");
        let child = bus.open("https://child.example");
        let mut inbox = child.subscribe();

        host.post(&child, json!({ "hello": 1 }), "https://child.example")
            .unwrap();

        let inbound = inbox.next().await.unwrap();
        assert_eq!(inbound.origin, "https://host.example");
        assert_eq!(inbound.payload, json!({ "hello": 1 }));
    }

    #[tokio::test]
    async fn test_target_origin_mismatch_is_dropped() {
        let bus = MemoryBus::new();
        let host = bus.open("https://host.example");
        let child = bus.open("https://child.example");
        let mut inbox = child.subscribe();

        host.post(&child, json!(1), "https://other.example").unwrap();
        host.post(&child, json!(2), ANY_ORIGIN).unwrap();

        assert_eq!(inbox.next().await.unwrap().payload, json!(2));
    }

    #[tokio::test]
    async fn test_unsubscribed_payload_is_lost() {
        let bus = MemoryBus::new();
        let host = bus.open("https://host.example");
        let child = bus.open("https://child.example");

        host.post(&child, json!("early"), ANY_ORIGIN).unwrap();
        let mut inbox = child.subscribe();
        host.post(&child, json!("late"), ANY_ORIGIN).unwrap();

        assert_eq!(inbox.next().await.unwrap().payload, json!("late"));
    }

    #[tokio::test]
    async fn test_navigate_changes_origin() {
        let bus = MemoryBus::new();
        let host = bus.open("https://host.example");
        let child = bus.open("https://child.example");
        let mut inbox = host.subscribe();

        child.navigate("https://www.child.example");
        child.post(&host, json!(1), ANY_ORIGIN).unwrap();

        assert_eq!(inbox.next().await.unwrap().origin, "https://www.child.example");
    }

    #[tokio::test]
    async fn test_close_detaches_remote() {
        let bus = MemoryBus::new();
        let host = bus.open("https://host.example");
        let child = bus.open("https://child.example");
        let mut child_inbox = child.subscribe();
        let channel = host.channel_to(&child);

        channel.close();

        assert!(!child.is_open());
        assert_eq!(bus.len(), 1);
        assert!(child_inbox.next().await.is_none());
        assert!(matches!(
            channel.post(json!(1), ANY_ORIGIN),
            Err(ChannelError::Closed)
        ));
    }
}
