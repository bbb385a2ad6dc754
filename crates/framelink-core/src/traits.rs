//! Transport abstraction shared by host and child.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::Envelope;

/// Target origin that matches any receiver.
pub const ANY_ORIGIN: &str = "*";

/// A payload received from another context.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Origin of the sending context, as reported by the transport.
    pub origin: String,
    /// Raw payload. May be anything, including traffic unrelated to us.
    pub payload: Value,
}

impl Inbound {
    /// Create a new inbound payload.
    #[must_use]
    pub fn new(origin: impl Into<String>, payload: Value) -> Self {
        Self {
            origin: origin.into(),
            payload,
        }
    }
}

/// Stream of inbound payloads for one subscription.
pub type InboundStream = BoxStream<'static, Inbound>;

/// Channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for message transports between two contexts.
///
/// A channel posts to one peer context and subscribes to everything the
/// local context receives, from any sender.
pub trait Channel: Send + Sync {
    /// Post a payload to the peer.
    ///
    /// The payload is only delivered when `target_origin` is [`ANY_ORIGIN`]
    /// or equals the peer's current origin. A mismatch is not an error.
    ///
    /// # Errors
    /// Returns error if the peer is gone.
    fn post(&self, payload: Value, target_origin: &str) -> Result<(), ChannelError>;

    /// Subscribe to inbound payloads of the local context.
    fn subscribe(&self) -> InboundStream;

    /// Detach the peer. Default is a no-op.
    fn close(&self) {}
}

impl<C: Channel + ?Sized> Channel for Arc<C> {
    fn post(&self, payload: Value, target_origin: &str) -> Result<(), ChannelError> {
        (**self).post(payload, target_origin)
    }

    fn subscribe(&self) -> InboundStream {
        (**self).subscribe()
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Serialize and post an envelope.
///
/// # Errors
/// Returns error if serialization or the post fails.
pub fn post_envelope<C>(
    channel: &C,
    envelope: &Envelope,
    target_origin: &str,
) -> Result<(), ChannelError>
where
    C: Channel + ?Sized,
{
    let payload = serde_json::to_value(envelope)?;
    channel.post(payload, target_origin)
}
