//! Child side of a framelink session.
//!
//! Provides:
//! - `HandshakeResponder` - Answers the host's handshake
//! - `ChildHandle` - Model dispatch and event emission

pub mod error;
pub mod handle;
pub mod responder;

pub use error::ChildError;
pub use handle::ChildHandle;
pub use responder::HandshakeResponder;
