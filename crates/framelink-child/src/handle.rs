//! Post-handshake API on the child side.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use framelink_core::{
    Channel, EmitValue, Envelope, InboundStream, Message, Model, post_envelope, sanitize,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::ChildError;

struct Shared {
    channel: Arc<dyn Channel>,
    parent_origin: String,
    model: Model,
}

/// Child-side handle to an established session.
///
/// Serves `call` and `request` messages from the parent against the model
/// and emits events back to it.
///
/// Dropping the handle stops serving the parent.
pub struct ChildHandle {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ChildHandle {
    pub(crate) fn spawn(
        channel: Arc<dyn Channel>,
        inbound: InboundStream,
        parent_origin: String,
        model: Model,
    ) -> Self {
        let shared = Arc::new(Shared {
            channel,
            parent_origin,
            model,
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
    pub fn parent_origin(&self) -> &str {
        &self.shared.parent_origin
    }

    /// The model, including host-provided defaults.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.shared.model
    }

    /// Send an event to the parent. No acknowledgement is expected.
    ///
    /// # Errors
    /// Returns error if the handle is destroyed or the message cannot be sent.
    pub fn emit(&self, name: impl Into<String>, data: Value) -> Result<(), ChildError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ChildError::Destroyed);
        }
        let value = EmitValue {
            name: name.into(),
            data,
        };
        post_envelope(
            &*self.shared.channel,
            &Envelope::new(Message::Emit { value }),
            &self.shared.parent_origin,
        )?;
        Ok(())
    }

    /// Stop serving the parent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(parent_origin = %self.shared.parent_origin, "Destroying child handle");
        self.stop_listener();
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
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

async fn listen(shared: Arc<Shared>, mut inbound: InboundStream) {
    while let Some(msg) = inbound.next().await {
        let Some(envelope) = sanitize::parse(&msg, Some(shared.parent_origin.as_str())) else {
            continue;
        };
        match envelope.message {
            Message::Call { key, data } => match shared.model.call(&key, data) {
                Some(call) => {
                    tokio::spawn(call);
                }
                None => tracing::debug!(%key, "No callable for call"),
            },
            Message::Request { key, uid } => {
                let value = shared.model.resolve(&key);
                let shared = Arc::clone(&shared);
                let reply_to = msg.origin;
                tokio::spawn(async move {
                    let reply = Envelope::new(Message::Reply {
                        uid,
                        value: value.await,
                    });
                    if let Err(e) = post_envelope(&*shared.channel, &reply, &reply_to) {
                        tracing::warn!(uid, "Failed to send reply: {e}");
                    }
                });
            }
            other => {
                tracing::trace!(kind = other.kind().as_str(), "Ignoring message");
            }
        }
    }
    tracing::debug!(parent_origin = %shared.parent_origin, "Parent channel closed");
}
