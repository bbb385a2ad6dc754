//! Host error.

use framelink_core::ChannelError;

/// Errors surfaced by the host side of a session.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Handshake Timeout Reached")]
    HandshakeTimeout,
    #[error("Failed handshake")]
    InvalidHandshakeReply,
    #[error("Invalid url: {0}")]
    InvalidUrl(String),
    #[error("Session destroyed")]
    Destroyed,
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
