//! Core networking and coordination substrate for cross-machine input
//! sharing: wire protocol, ordered delivery, message exchange, event bus,
//! edge-crossing detection, stream handlers, peer registry, connection
//! handshake/heartbeat, and the cursor guard coordinator.

pub mod collaborators;
pub mod connection;
pub mod coordinator;
pub mod cursor_guard;
pub mod edge;
pub mod error;
pub mod event_bus;
pub mod exchange;
pub mod ordered_queue;
pub mod protocol;
pub mod registry;
pub mod stream_handlers;

pub use error::{CoreError, CoreResult};
