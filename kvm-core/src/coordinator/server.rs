//! Server-side edge-crossing state machine (spec.md §4.G "Server-side
//! state machine"): LOCAL (server owns inputs) vs. REMOTE (a client owns
//! them).

use super::{CROSS_ENTER_EVENT, CROSS_SCREEN};
use crate::edge::{self, Edge, MovementHistory};
use crate::event_bus::{EventBus, EventType};
use crate::protocol::{message_type, Payload, ProtocolMessage, ScreenPosition};
use crate::registry::PeerRegistry;
use crate::stream_handlers::{OutboundEvent, UnidirectionalHandler};
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// Which neighbor currently owns input, if any (spec.md §3 "Active-Screen
/// State" — server side is `{None, left, right, top, bottom}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Local,
    Remote(ScreenPosition),
}

pub struct ServerEdgeCoordinator {
    bus: Arc<EventBus>,
    registry: Arc<SyncMutex<PeerRegistry>>,
    screen_w: f64,
    screen_h: f64,
    direction_ratio: f64,
    min_samples: usize,
    history: SyncMutex<MovementHistory>,
    state: SyncMutex<ServerState>,
    /// Serializes concurrent edge fires (spec.md §4.G step a): only one
    /// crossing may be in flight at a time.
    crossing_lock: AsyncMutex<()>,
    mouse_handler: Arc<UnidirectionalHandler>,
    keyboard_handler: Arc<UnidirectionalHandler>,
}

impl ServerEdgeCoordinator {
    pub fn new(bus: Arc<EventBus>, registry: Arc<SyncMutex<PeerRegistry>>, screen_w: f64, screen_h: f64) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            bus,
            registry,
            screen_w,
            screen_h,
            direction_ratio: edge::DEFAULT_DIRECTION_RATIO,
            min_samples: edge::DEFAULT_MIN_SAMPLES,
            history: SyncMutex::new(MovementHistory::default()),
            state: SyncMutex::new(ServerState::Local),
            crossing_lock: AsyncMutex::new(()),
            mouse_handler: UnidirectionalHandler::new("server-mouse-out"),
            keyboard_handler: UnidirectionalHandler::new("server-keyboard-out"),
        });
        coordinator.clone().install_subscriptions();
        coordinator
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn mouse_handler(&self) -> &Arc<UnidirectionalHandler> {
        &self.mouse_handler
    }

    pub fn keyboard_handler(&self) -> &Arc<UnidirectionalHandler> {
        &self.keyboard_handler
    }

    /// Wire a newly connected peer's COMMAND substream to this coordinator
    /// so an inbound `cross_screen` (the client asking to go back to
    /// LOCAL) is handled (spec.md §4.G "Control flow for edge return").
    pub fn attach_peer(self: &Arc<Self>, position: ScreenPosition, command_exchange: &crate::exchange::MessageExchange) {
        let coordinator = Arc::clone(self);
        command_exchange.register_handler(
            message_type::COMMAND,
            Arc::new(move |message: ProtocolMessage| {
                if message.payload.get("command").and_then(Value::as_str) != Some(CROSS_SCREEN) {
                    return;
                }
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.on_client_returned(position, &message.payload).await });
            }),
        );
    }

    /// Called on every sample from the local mouse listener while the
    /// server owns input. A no-op while REMOTE — native suppression of the
    /// server's own input during REMOTE is the platform filter's job
    /// (spec.md §4.G "In REMOTE").
    pub async fn on_local_move(self: &Arc<Self>, x: f64, y: f64, is_dragging: bool) {
        if self.state() != ServerState::Local {
            return;
        }
        let samples = {
            let mut history = self.history.lock();
            history.push((x, y));
            history.as_slice()
        };
        let Some(edge) = edge::detect_edge(&samples, self.screen_w, self.screen_h, is_dragging, self.direction_ratio, self.min_samples) else {
            return;
        };
        let target = edge.as_screen_position();
        let has_mouse_stream = self
            .registry
            .lock()
            .get_by_position(target)
            .is_some_and(|p| p.is_connected && p.stream(crate::protocol::StreamType::Mouse).is_some());
        if !has_mouse_stream {
            return;
        }
        self.initiate_crossing(edge, target, x, y).await;
    }

    /// Forward a local mouse/keyboard event to the active peer while
    /// REMOTE (spec.md §4.G "mouse/keyboard stream handlers forward to
    /// the active peer").
    pub async fn forward_mouse(&self, event: OutboundEvent) {
        if self.state() == ServerState::Local {
            return;
        }
        let _ = self.mouse_handler.send(event).await;
    }

    pub async fn forward_keyboard(&self, event: OutboundEvent) {
        if self.state() == ServerState::Local {
            return;
        }
        let _ = self.keyboard_handler.send(event).await;
    }

    async fn initiate_crossing(self: &Arc<Self>, edge: Edge, target: ScreenPosition, x: f64, y: f64) {
        let _permit = self.crossing_lock.lock().await;
        if self.state() != ServerState::Local {
            return; // another crossing already won the race
        }
        self.history.lock().clear();

        // Dispatch SCREEN_CHANGE_GUARD before any network message so the
        // cursor overlay is already warping/capturing by the time the
        // peer starts receiving input (spec.md §4.G step c).
        self.bus
            .dispatch(EventType::ScreenChangeGuard, json!({"active_screen": target.as_str(), "x": x, "y": y}))
            .await;

        let (norm_x, norm_y) = edge::normalize_first_crossing(edge, x, y, self.screen_w, self.screen_h);

        let (command_exchange, mouse_exchange) = {
            let registry = self.registry.lock();
            let Some(peer) = registry.get_by_position(target) else { return };
            (peer.command_stream().cloned(), peer.stream(crate::protocol::StreamType::Mouse).cloned())
        };

        if let Some(command_exchange) = &command_exchange {
            let mut params = Payload::new();
            params.insert("x".into(), Value::from(norm_x));
            params.insert("y".into(), Value::from(norm_y));
            if let Err(e) = command_exchange.send_command(CROSS_SCREEN, params, Some("server".into()), Some(target.as_str().into())).await {
                log::warn!("failed to send cross_screen to {target:?}: {e}");
            }
        }
        if let Some(mouse_exchange) = &mouse_exchange {
            if let Err(e) = mouse_exchange
                .send_mouse(norm_x, norm_y, 0.0, 0.0, CROSS_ENTER_EVENT, false, Some("server".into()), Some(target.as_str().into()))
                .await
            {
                log::warn!("failed to send cross-enter mouse position to {target:?}: {e}");
            }
        }

        if let (Some(mouse), Some(_command)) = (&mouse_exchange, &command_exchange) {
            self.mouse_handler.rebind(Some(Arc::clone(mouse)), Some("server".into()), Some(target.as_str().into())).await;
            let keyboard = self.registry.lock().get_by_position(target).and_then(|p| p.stream(crate::protocol::StreamType::Keyboard).cloned());
            self.keyboard_handler.rebind(keyboard, Some("server".into()), Some(target.as_str().into())).await;
        }

        *self.state.lock() = ServerState::Remote(target);
    }

    /// The client sent `cross_screen` back: it detected its own return
    /// edge. Deactivate it and hand input back to the server.
    async fn on_client_returned(self: &Arc<Self>, position: ScreenPosition, payload: &Payload) {
        if self.state() != ServerState::Remote(position) {
            return; // stale/duplicate return from a peer that isn't active
        }
        self.mouse_handler.rebind(None, None, None).await;
        self.keyboard_handler.rebind(None, None, None).await;
        *self.state.lock() = ServerState::Local;

        let params = payload.get("params").and_then(Value::as_object).cloned().unwrap_or_default();
        let x = params.get("x").and_then(Value::as_f64).unwrap_or(0.0) * self.screen_w;
        let y = params.get("y").and_then(Value::as_f64).unwrap_or(0.0) * self.screen_h;
        self.bus.dispatch(EventType::ScreenChangeGuard, json!({"active_screen": Value::Null, "x": x, "y": y})).await;
    }

    fn install_subscriptions(self: Arc<Self>) {
        let coordinator = Arc::clone(&self);
        self.bus.subscribe(
            EventType::ClientDisconnected,
            Arc::new(move |data| {
                let coordinator = Arc::clone(&coordinator);
                Box::pin(async move { coordinator.on_client_disconnected(data).await })
            }),
            false,
        );
    }

    async fn on_client_disconnected(self: &Arc<Self>, data: Value) {
        let Some(position_str) = data.get("screen_position").and_then(Value::as_str) else { return };
        let is_active = matches!(self.state(), ServerState::Remote(p) if p.as_str() == position_str);
        if is_active {
            self.mouse_handler.rebind(None, None, None).await;
            self.keyboard_handler.rebind(None, None, None).await;
            *self.state.lock() = ServerState::Local;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamType;
    use crate::registry::Peer;
    use std::net::SocketAddr;
    use tokio::io::duplex;

    fn addr(n: u16) -> SocketAddr {
        format!("127.0.0.1:{n}").parse().unwrap()
    }

    async fn connected_peer_with_mouse_and_command(position: ScreenPosition) -> Peer {
        let mut peer = Peer::new(addr(1), position);
        peer.mark_connected();
        for st in [StreamType::Command, StreamType::Mouse, StreamType::Keyboard] {
            let exchange = crate::exchange::MessageExchange::new(format!("{st:?}"), 4096, None);
            let (client, server) = duplex(8192);
            tokio::spawn(async move {
                let mut server = server;
                let mut buf = [0u8; 4096];
                use tokio::io::AsyncReadExt;
                loop {
                    match server.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });
            exchange.set_writer(Some(Box::new(client))).await;
            peer.streams.insert(st, exchange);
        }
        peer
    }

    #[tokio::test]
    async fn edge_fire_transitions_to_remote_and_rebinds_handlers() {
        let bus = EventBus::new();
        let registry = Arc::new(SyncMutex::new(PeerRegistry::new()));
        registry.lock().add_peer(connected_peer_with_mouse_and_command(ScreenPosition::Left).await).unwrap();

        let coordinator = ServerEdgeCoordinator::new(bus, registry, 1920.0, 1080.0);
        assert_eq!(coordinator.state(), ServerState::Local);

        for (x, y) in [(200.0, 500.0), (150.0, 500.0), (100.0, 500.0), (50.0, 500.0), (20.0, 500.0), (0.0, 500.0)] {
            coordinator.on_local_move(x, y, false).await;
        }

        assert_eq!(coordinator.state(), ServerState::Remote(ScreenPosition::Left));
        assert!(coordinator.mouse_handler.is_bound());
        assert!(coordinator.keyboard_handler.is_bound());
    }

    #[tokio::test]
    async fn dragging_suppresses_crossing_on_server() {
        let bus = EventBus::new();
        let registry = Arc::new(SyncMutex::new(PeerRegistry::new()));
        registry.lock().add_peer(connected_peer_with_mouse_and_command(ScreenPosition::Left).await).unwrap();
        let coordinator = ServerEdgeCoordinator::new(bus, registry, 1920.0, 1080.0);

        for (x, y) in [(200.0, 500.0), (150.0, 500.0), (100.0, 500.0), (50.0, 500.0), (20.0, 500.0), (0.0, 500.0)] {
            coordinator.on_local_move(x, y, true).await;
        }
        assert_eq!(coordinator.state(), ServerState::Local);
    }

    #[tokio::test]
    async fn without_a_connected_neighbor_no_crossing_happens() {
        let bus = EventBus::new();
        let registry = Arc::new(SyncMutex::new(PeerRegistry::new()));
        let coordinator = ServerEdgeCoordinator::new(bus, registry, 1920.0, 1080.0);

        for (x, y) in [(200.0, 500.0), (150.0, 500.0), (100.0, 500.0), (50.0, 500.0), (20.0, 500.0), (0.0, 500.0)] {
            coordinator.on_local_move(x, y, false).await;
        }
        assert_eq!(coordinator.state(), ServerState::Local);
    }

    #[tokio::test]
    async fn client_disconnect_while_active_returns_to_local() {
        let bus = EventBus::new();
        let registry = Arc::new(SyncMutex::new(PeerRegistry::new()));
        registry.lock().add_peer(connected_peer_with_mouse_and_command(ScreenPosition::Left).await).unwrap();
        let coordinator = ServerEdgeCoordinator::new(Arc::clone(&bus), registry, 1920.0, 1080.0);

        for (x, y) in [(200.0, 500.0), (150.0, 500.0), (100.0, 500.0), (50.0, 500.0), (20.0, 500.0), (0.0, 500.0)] {
            coordinator.on_local_move(x, y, false).await;
        }
        assert_eq!(coordinator.state(), ServerState::Remote(ScreenPosition::Left));

        bus.dispatch(EventType::ClientDisconnected, json!({"screen_position": "left"})).await;
        assert_eq!(coordinator.state(), ServerState::Local);
        assert!(!coordinator.mouse_handler.is_bound());
    }
}
