//! Transports for framelink sessions.
//!
//! Provides:
//! - In-process bus of contexts (`MemoryBus`)
//! - WebSocket peers (feature: websocket)

pub mod memory;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryBus, MemoryChannel, MemoryContext};

#[cfg(feature = "websocket")]
pub use websocket::{WsPeer, create_ws_router};
