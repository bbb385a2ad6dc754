//! Child error.

use framelink_core::ChannelError;

/// Errors surfaced by the child side of a session.
#[derive(Debug, thiserror::Error)]
pub enum ChildError {
    #[error("Handshake Reply Failed")]
    HandshakeReplyFailed,
    #[error("Session destroyed")]
    Destroyed,
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
