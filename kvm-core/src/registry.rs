//! Peer registry (`ClientsManager` in the original): the set of known
//! remote hosts, keyed uniquely by address and by screen_position
//! (spec.md §3, §4.H).

use crate::error::{CoreError, CoreResult};
use crate::exchange::MessageExchange;
use crate::protocol::{ScreenPosition, StreamType};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One remote host. Mirrors `ClientObj` in the original: address,
/// declared screen_position, resolution, ssl flag, opened substreams, and
/// connection bookkeeping.
pub struct Peer {
    pub address: SocketAddr,
    pub screen_position: ScreenPosition,
    pub screen_resolution: Option<(u32, u32)>,
    pub ssl: bool,
    pub is_connected: bool,
    connected_since: Option<Instant>,
    connection_time_accum: Duration,
    pub streams: HashMap<StreamType, Arc<MessageExchange>>,
}

impl Peer {
    pub fn new(address: SocketAddr, screen_position: ScreenPosition) -> Self {
        Self {
            address,
            screen_position,
            screen_resolution: None,
            ssl: false,
            is_connected: false,
            connected_since: None,
            connection_time_accum: Duration::ZERO,
            streams: HashMap::new(),
        }
    }

    pub fn mark_connected(&mut self) {
        self.is_connected = true;
        self.connected_since = Some(Instant::now());
    }

    /// Accumulate elapsed connected time and clear substreams; called on
    /// disconnect so `connection_time()` reflects total time-ever-connected.
    pub fn mark_disconnected(&mut self) {
        if let Some(since) = self.connected_since.take() {
            self.connection_time_accum += since.elapsed();
        }
        self.is_connected = false;
        self.streams.clear();
    }

    pub fn connection_time(&self) -> Duration {
        self.connection_time_accum + self.connected_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn command_stream(&self) -> Option<&Arc<MessageExchange>> {
        self.streams.get(&StreamType::Command)
    }

    pub fn stream(&self, stream_type: StreamType) -> Option<&Arc<MessageExchange>> {
        self.streams.get(&stream_type)
    }
}

/// A set of [`Peer`]s, unique by address and by screen_position
/// (spec.md §3 invariant; §4.H operations).
#[derive(Default)]
pub struct PeerRegistry {
    by_address: HashMap<SocketAddr, Peer>,
    position_index: HashMap<ScreenPosition, SocketAddr>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new peer. Fails if `screen_position` is already taken by
    /// a different peer (spec.md §8 S5, §7 "registry error").
    pub fn add_peer(&mut self, peer: Peer) -> CoreResult<()> {
        if let Some(existing_addr) = self.position_index.get(&peer.screen_position) {
            if *existing_addr != peer.address {
                return Err(CoreError::Registry(format!(
                    "screen_position {:?} already assigned to {}",
                    peer.screen_position, existing_addr
                )));
            }
        }
        self.position_index.insert(peer.screen_position, peer.address);
        self.by_address.insert(peer.address, peer);
        Ok(())
    }

    /// Replace the peer at `address` in place. Errors if absent
    /// (`ClientsManager.update_client` in the original).
    pub fn update_peer(&mut self, address: SocketAddr, f: impl FnOnce(&mut Peer)) -> CoreResult<()> {
        let peer = self
            .by_address
            .get_mut(&address)
            .ok_or_else(|| CoreError::Registry(format!("no peer at {address}")))?;
        f(peer);
        Ok(())
    }

    pub fn remove_by_address(&mut self, address: SocketAddr) -> Option<Peer> {
        let peer = self.by_address.remove(&address)?;
        self.position_index.remove(&peer.screen_position);
        Some(peer)
    }

    pub fn remove_by_position(&mut self, position: ScreenPosition) -> Option<Peer> {
        let addr = self.position_index.remove(&position)?;
        self.by_address.remove(&addr)
    }

    pub fn get_by_address(&self, address: SocketAddr) -> Option<&Peer> {
        self.by_address.get(&address)
    }

    pub fn get_by_address_mut(&mut self, address: SocketAddr) -> Option<&mut Peer> {
        self.by_address.get_mut(&address)
    }

    pub fn get_by_position(&self, position: ScreenPosition) -> Option<&Peer> {
        let addr = self.position_index.get(&position)?;
        self.by_address.get(addr)
    }

    pub fn get_by_position_mut(&mut self, position: ScreenPosition) -> Option<&mut Peer> {
        let addr = *self.position_index.get(&position)?;
        self.by_address.get_mut(&addr)
    }

    pub fn contains_address(&self, address: SocketAddr) -> bool {
        self.by_address.contains_key(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.by_address.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.by_address.values_mut()
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = &Peer> {
        self.by_address.values().filter(|p| p.is_connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u16) -> SocketAddr {
        format!("127.0.0.1:{n}").parse().unwrap()
    }

    #[test]
    fn duplicate_screen_position_is_rejected() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(Peer::new(addr(1), ScreenPosition::Left)).unwrap();
        let err = registry.add_peer(Peer::new(addr(2), ScreenPosition::Left));
        assert!(err.is_err());
        // First peer is unchanged (S5).
        assert!(registry.get_by_position(ScreenPosition::Left).is_some());
        assert_eq!(registry.get_by_position(ScreenPosition::Left).unwrap().address, addr(1));
        assert!(registry.get_by_address(addr(2)).is_none());
    }

    #[test]
    fn lookup_by_address_and_position() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(Peer::new(addr(1), ScreenPosition::Top)).unwrap();
        assert!(registry.get_by_address(addr(1)).is_some());
        assert!(registry.get_by_position(ScreenPosition::Top).is_some());
        assert!(registry.get_by_position(ScreenPosition::Bottom).is_none());
    }

    #[test]
    fn remove_by_position_clears_both_indices() {
        let mut registry = PeerRegistry::new();
        registry.add_peer(Peer::new(addr(1), ScreenPosition::Right)).unwrap();
        assert!(registry.remove_by_position(ScreenPosition::Right).is_some());
        assert!(registry.get_by_address(addr(1)).is_none());
        assert!(registry.get_by_position(ScreenPosition::Right).is_none());
    }

    #[test]
    fn update_peer_errors_when_absent() {
        let mut registry = PeerRegistry::new();
        let err = registry.update_peer(addr(9), |_| {});
        assert!(err.is_err());
    }
}
