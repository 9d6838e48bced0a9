//! Connection layer (spec.md §4.D): symmetric server/client handshake,
//! substream multiplexing, heartbeat, and client-side reconnect.

pub mod client;
pub mod server;
mod transport;

pub use transport::{DynReader, DynWriter, TlsClientConfig, TlsServerConfig};

use crate::protocol::ScreenPosition;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HandshakeTimeouts {
    /// Total time to wait for the initial EXCHANGE response (spec.md §4.D
    /// "handshake timeout 5s total for step 3").
    pub initial: Duration,
    /// Time to wait for each additional substream to connect (spec.md
    /// §4.D "Timeouts: 10s per additional substream").
    pub additional_stream: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self { initial: Duration::from_secs(5), additional_stream: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionTuning {
    pub max_chunk_size: usize,
    pub heartbeat_interval: Duration,
    pub max_delay_tolerance: Duration,
    pub parallel_processors: usize,
}

impl Default for ConnectionTuning {
    fn default() -> Self {
        Self {
            max_chunk_size: 60 * 1024,
            heartbeat_interval: Duration::from_secs(5),
            max_delay_tolerance: Duration::from_millis(100),
            parallel_processors: 2,
        }
    }
}

/// Invoked once a peer finishes handshaking and is registered
/// (spec.md §4.D step 5 "connected_callback is invoked").
pub type ConnectedHook = Arc<dyn Fn(SocketAddr, ScreenPosition) + Send + Sync>;
/// Invoked once a peer's connection is torn down, for any reason
/// (spec.md §7 "invoke disconnected_callback").
pub type DisconnectedHook = Arc<dyn Fn(SocketAddr, ScreenPosition) + Send + Sync>;
