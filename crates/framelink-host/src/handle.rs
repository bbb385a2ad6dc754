//! Post-handshake API on the host side.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use framelink_core::{
    Channel, CorrelationRegistry, Envelope, EventRegistry, InboundStream, Message,
    post_envelope, sanitize,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{FrameInfo, HostConfig, HostError, handshake::HandshakeInitiator};

struct Shared {
    channel: Arc<dyn Channel>,
    child_origin: String,
    correlation: CorrelationRegistry,
    events: EventRegistry,
    frame: FrameInfo,
}

/// Host-side handle to an established session.
///
/// Dropping the handle stops its listener without detaching the child.
pub struct HostHandle {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl HostHandle {
    /// Handshake with the child described by `config`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the handshake fails.
    pub async fn connect(config: &HostConfig, channel: Arc<dyn Channel>) -> Result<Self, HostError> {
        HandshakeInitiator::new(config, channel)?.run().await
    }

    pub(crate) fn spawn(
        channel: Arc<dyn Channel>,
        inbound: InboundStream,
        child_origin: String,
        frame: FrameInfo,
    ) -> Self {
        let shared = Arc::new(Shared {
            channel,
            child_origin,
            correlation: CorrelationRegistry::new(),
            events: EventRegistry::new(),
            frame,
        });
        let listener = tokio::spawn(listen(Arc::clone(&shared), inbound));

        Self {
            shared,
            listener: Mutex::new(Some(listener)),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Origin pinned at handshake time.
    #[must_use]
    pub fn child_origin(&self) -> &str {
        &self.shared.child_origin
    }

    #[must_use]
    pub fn frame(&self) -> &FrameInfo {
        &self.shared.frame
    }

    /// Number of `get` calls awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.correlation.pending()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Read a property of the child's model.
    ///
    /// There is no timeout: if the child never replies the future stays
    /// pending. Dropping the future stops tracking the request.
    ///
    /// # Errors
    /// Returns error if the request cannot be sent or the handle is
    /// destroyed before the reply arrives.
    pub async fn get(&self, key: impl Into<String>) -> Result<Value, HostError> {
        if self.is_destroyed() {
            return Err(HostError::Destroyed);
        }
        let (uid, reply) = self.shared.correlation.track();
        let _untrack = Untrack {
            registry: &self.shared.correlation,
            uid,
        };
        // destroy may have cleared the registry before this uid was tracked.
        if self.is_destroyed() {
            return Err(HostError::Destroyed);
        }
        self.send(Message::Request {
            key: key.into(),
            uid,
        })?;
        reply.await.map_err(|_| HostError::Destroyed)
    }

    /// Invoke a function of the child's model. No reply is expected.
    ///
    /// # Errors
    /// Returns error if the message cannot be sent.
    pub fn call(&self, key: impl Into<String>, data: Value) -> Result<(), HostError> {
        if self.is_destroyed() {
            return Err(HostError::Destroyed);
        }
        self.send(Message::Call {
            key: key.into(),
            data,
        })
    }

    /// Register a callback for events emitted by the child.
    pub fn on<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.shared.events.on(name, handler);
    }

    /// Stop listening, fail pending requests and detach the child.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(child_origin = %self.shared.child_origin, "Destroying host handle");
        self.stop_listener();
        self.shared.correlation.clear();
        self.shared.events.clear();
        self.shared.channel.close();
    }

    fn stop_listener(&self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }

    fn send(&self, message: Message) -> Result<(), HostError> {
        post_envelope(
            &*self.shared.channel,
            &Envelope::new(message),
            &self.shared.child_origin,
        )?;
        Ok(())
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

struct Untrack<'a> {
    registry: &'a CorrelationRegistry,
    uid: u64,
}

impl Drop for Untrack<'_> {
    fn drop(&mut self) {
        self.registry.forget(self.uid);
    }
}

async fn listen(shared: Arc<Shared>, mut inbound: InboundStream) {
    while let Some(msg) = inbound.next().await {
        let Some(envelope) = sanitize::parse(&msg, Some(shared.child_origin.as_str())) else {
            continue;
        };
        match envelope.message {
            Message::Emit { value } => {
                if shared.events.emit(&value.name, &value.data) == 0 {
                    tracing::debug!(event = %value.name, "No listeners for event");
                }
            }
            Message::Reply { uid, value } => {
                if !shared.correlation.resolve(uid, value) {
                    tracing::debug!(uid, "Reply without pending request");
                }
            }
            other => {
                tracing::trace!(kind = other.kind().as_str(), "Ignoring message");
            }
        }
    }
    tracing::debug!(child_origin = %shared.child_origin, "Child channel closed");
}
