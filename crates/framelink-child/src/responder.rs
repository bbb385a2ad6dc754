//! Session establishment from the child side.

use std::sync::Arc;

use framelink_core::{
    Channel, ChannelError, Envelope, InboundStream, Message, Model, post_envelope,
    sanitize::{self, has_discriminant},
};
use futures::StreamExt;

use crate::{ChildError, ChildHandle};

/// Waits for the host's handshake and answers it.
///
/// The subscription is taken at construction, so create the responder as
/// early as possible in the child's startup.
pub struct HandshakeResponder {
    channel: Arc<dyn Channel>,
    inbound: InboundStream,
    model: Model,
}

impl HandshakeResponder {
    /// Start listening for a handshake.
    #[must_use]
    pub fn listen(channel: Arc<dyn Channel>, model: Model) -> Self {
        let inbound = channel.subscribe();
        Self {
            channel,
            inbound,
            model,
        }
    }

    /// Wait for the handshake, reply, and build the child handle.
    ///
    /// Payloads without the protocol discriminant are skipped. Only the first
    /// handshake is honored; its sender's origin becomes the trusted parent
    /// origin and its model entries overwrite local ones.
    ///
    /// # Errors
    /// Returns `HandshakeReplyFailed` if the first protocol message is not a
    /// valid handshake, or a channel error if the reply cannot be sent or
    /// the inbound stream ends.
    pub async fn accept(self) -> Result<ChildHandle, ChildError> {
        let Self {
            channel,
            mut inbound,
            mut model,
        } = self;

        loop {
            let Some(msg) = inbound.next().await else {
                return Err(ChildError::Channel(ChannelError::Closed));
            };
            if !has_discriminant(&msg.payload) {
                tracing::trace!(origin = %msg.origin, "Ignoring non-protocol payload");
                continue;
            }

            let Some(Message::Handshake { model: defaults }) =
                sanitize::parse(&msg, None).map(|envelope| envelope.message)
            else {
                tracing::warn!(origin = %msg.origin, "Expected handshake");
                return Err(ChildError::HandshakeReplyFailed);
            };

            post_envelope(
                &*channel,
                &Envelope::new(Message::HandshakeReply),
                &msg.origin,
            )?;
            if let Some(defaults) = defaults {
                model.merge_defaults(defaults);
            }

            tracing::info!(parent_origin = %msg.origin, "Handshake accepted");
            return Ok(ChildHandle::spawn(channel, inbound, msg.origin, model));
        }
    }
}
