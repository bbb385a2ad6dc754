//! Core protocol types for cross-context messaging.
//!
//! This crate provides the pieces shared by both ends of a session:
//! - `Envelope` / `Message` - Typed wire envelope
//! - `sanitize` - Origin and schema gate for inbound payloads
//! - `CorrelationRegistry` - Request ids and pending replies
//! - `Model` - Child-side capability map
//! - `EventRegistry` - Host-side event callbacks
//! - `Channel` trait for transports

pub mod correlation;
pub mod envelope;
pub mod events;
pub mod model;
pub mod sanitize;
pub mod traits;

pub use correlation::CorrelationRegistry;
pub use envelope::{EmitValue, Envelope, Message, MessageKind};
pub use events::{EventHandler, EventRegistry};
pub use model::{Model, ModelEntry, ModelFuture};
pub use sanitize::sanitize;
pub use traits::{ANY_ORIGIN, Channel, ChannelError, Inbound, InboundStream, post_envelope};
