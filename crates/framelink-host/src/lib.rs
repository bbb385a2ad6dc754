//! Host side of a framelink session.
//!
//! Provides:
//! - `HostConfig` - Child URL, model defaults and retry policy
//! - `HandshakeInitiator` / `RetryScheduler` - Session establishment
//! - `HostHandle` - Remote `get`, `call` and event subscription

pub mod config;
pub mod error;
pub mod handle;
pub mod handshake;

pub use config::{FrameInfo, HandshakeOptions, HostConfig, resolve_origin};
pub use error::HostError;
pub use handle::HostHandle;
pub use handshake::{HandshakeInitiator, RetryScheduler};
