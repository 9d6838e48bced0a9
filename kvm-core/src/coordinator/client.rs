//! Client-side edge-crossing controller (spec.md §4.G "Client-side state
//! machine"): INACTIVE (no input injection) vs. ACTIVE (injecting input,
//! watching for the return edge).

use super::{CROSS_ENTER_EVENT, CROSS_SCREEN};
use crate::collaborators::InputInjector;
use crate::edge::{self, ClickTracker, MouseButton, MovementHistory};
use crate::event_bus::{EventBus, EventType};
use crate::exchange::MessageExchange;
use crate::protocol::{message_type, Payload, ProtocolMessage, ScreenPosition};
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Minimum sample count to fire an edge client-side — lower than the
/// server's default since the client only needs to notice its own
/// immediate return, not filter out an external listener's noise
/// (spec.md §4.G "At least 2 samples required").
pub const CLIENT_MIN_SAMPLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Inactive,
    Active,
}

pub struct ClientEdgeCoordinator {
    bus: Arc<EventBus>,
    injector: Arc<dyn InputInjector>,
    /// The screen_position the server considers this client to be at
    /// (e.g. this client is the server's "left" neighbor).
    neighbor: ScreenPosition,
    screen_w: f64,
    screen_h: f64,
    state: SyncMutex<ClientState>,
    history: SyncMutex<MovementHistory>,
    clicks: SyncMutex<ClickTracker>,
    /// Latched the instant a return-crossing is sent, so a burst of
    /// further injected moves before the server acknowledges doesn't send
    /// `cross_screen` twice (spec.md §4.G "Set cross_screen_event").
    cross_latch: AtomicBool,
    command_exchange: SyncMutex<Option<Arc<MessageExchange>>>,
}

impl ClientEdgeCoordinator {
    pub fn new(bus: Arc<EventBus>, injector: Arc<dyn InputInjector>, neighbor: ScreenPosition, screen_w: f64, screen_h: f64) -> Arc<Self> {
        Arc::new(Self {
            bus,
            injector,
            neighbor,
            screen_w,
            screen_h,
            state: SyncMutex::new(ClientState::Inactive),
            history: SyncMutex::new(MovementHistory::default()),
            clicks: SyncMutex::new(ClickTracker::new()),
            cross_latch: AtomicBool::new(false),
            command_exchange: SyncMutex::new(None),
        })
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Register handlers on the three substreams the server addresses us
    /// on: COMMAND carries the cross-screen handoff in both directions,
    /// MOUSE/KEYBOARD carry the forwarded input. Call once, right after
    /// the handshake completes.
    pub fn attach(
        self: &Arc<Self>,
        command: Arc<MessageExchange>,
        mouse: Option<Arc<MessageExchange>>,
        keyboard: Option<Arc<MessageExchange>>,
    ) {
        let coordinator = Arc::clone(self);
        command.register_handler(
            message_type::COMMAND,
            Arc::new(move |message: ProtocolMessage| {
                if message.payload.get("command").and_then(Value::as_str) != Some(CROSS_SCREEN) {
                    return;
                }
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.on_activated(&message.payload).await });
            }),
        );
        *self.command_exchange.lock() = Some(command);

        if let Some(mouse) = mouse {
            let coordinator = Arc::clone(self);
            mouse.register_handler(
                message_type::MOUSE,
                Arc::new(move |message: ProtocolMessage| {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(async move { coordinator.on_inbound_mouse(&message.payload).await });
                }),
            );
        }
        if let Some(keyboard) = keyboard {
            let coordinator = Arc::clone(self);
            keyboard.register_handler(
                message_type::KEYBOARD,
                Arc::new(move |message: ProtocolMessage| {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(async move { coordinator.on_inbound_keyboard(&message.payload).await });
                }),
            );
        }
    }

    /// Server reactivated us: normalized `{x, y}` params give the starting
    /// position, matching the opposite-edge-entry convention
    /// (spec.md §4.G).
    async fn on_activated(self: &Arc<Self>, payload: &Payload) {
        *self.state.lock() = ClientState::Active;
        self.history.lock().clear();
        self.cross_latch.store(false, Ordering::SeqCst);

        let params = payload.get("params").and_then(Value::as_object).cloned().unwrap_or_default();
        let x = params.get("x").and_then(Value::as_f64).unwrap_or(0.5) * self.screen_w;
        let y = params.get("y").and_then(Value::as_f64).unwrap_or(0.5) * self.screen_h;
        if let Err(e) = self.injector.set_position(x, y).await {
            log::warn!("cursor injector failed to set initial position: {e}");
        }
        self.history.lock().push((x, y));
        self.bus.dispatch(EventType::ClientActive, json!({"x": x, "y": y})).await;
    }

    async fn on_inbound_mouse(self: &Arc<Self>, payload: &Payload) {
        if self.state() != ClientState::Active {
            return; // INACTIVE: drop, per spec.md §4.G
        }
        let event = payload.get("event").and_then(Value::as_str).unwrap_or("move");
        let is_pressed = payload.get("is_pressed").and_then(Value::as_bool).unwrap_or(false);

        if event == CROSS_ENTER_EVENT {
            let x = payload.get("x").and_then(Value::as_f64).unwrap_or(0.5) * self.screen_w;
            let y = payload.get("y").and_then(Value::as_f64).unwrap_or(0.5) * self.screen_h;
            if let Err(e) = self.injector.set_position(x, y).await {
                log::warn!("cursor injector failed on cross-enter: {e}");
            }
            self.after_inject(x, y).await;
            return;
        }

        match event {
            "move" => {
                let dx = payload.get("dx").and_then(Value::as_f64).unwrap_or(0.0);
                let dy = payload.get("dy").and_then(Value::as_f64).unwrap_or(0.0);
                if let Err(e) = self.injector.move_relative(dx, dy).await {
                    log::warn!("cursor injector failed on relative move: {e}");
                }
                let (x, y) = self.injector.current_position();
                self.after_inject(x, y).await;
            }
            "press" | "release" => {
                let Some(button) = button_from_payload(payload) else { return };
                let now = std::time::Instant::now();
                let result = if event == "press" {
                    let count = self.clicks.lock().on_press(button, now);
                    if count >= 2 { self.injector.click(button, count).await } else { self.injector.press(button).await }
                } else {
                    self.clicks.lock().on_release(now);
                    self.injector.release(button).await
                };
                if let Err(e) = result {
                    log::warn!("cursor injector failed on {event}: {e}");
                }
            }
            "scroll" => {
                let dx = payload.get("dx").and_then(Value::as_f64).unwrap_or(0.0);
                let dy = payload.get("dy").and_then(Value::as_f64).unwrap_or(0.0);
                if let Err(e) = self.injector.scroll(dx, dy).await {
                    log::warn!("cursor injector failed on scroll: {e}");
                }
            }
            other => log::debug!("unrecognized mouse event {other:?}, is_pressed={is_pressed}"),
        }
    }

    async fn on_inbound_keyboard(self: &Arc<Self>, payload: &Payload) {
        if self.state() != ClientState::Active {
            return;
        }
        let Some(key) = payload.get("key").and_then(Value::as_str) else { return };
        let pressed = payload.get("event").and_then(Value::as_str) == Some("press");
        if let Err(e) = self.injector.key(key, pressed).await {
            log::warn!("cursor injector failed on key {key:?}: {e}");
        }
    }

    /// After any injected move, clamp overshoot, record history, and check
    /// for a return edge (spec.md §4.G "Cursor clamping", return-crossing
    /// detection).
    async fn after_inject(self: &Arc<Self>, x: f64, y: f64) {
        let (cx, cy) = edge::clamp_position(x, y, self.screen_w, self.screen_h);
        if (cx, cy) != (x, y) {
            if let Err(e) = self.injector.set_position(cx, cy).await {
                log::warn!("cursor injector failed to clamp position: {e}");
            }
        }

        let is_dragging = self.clicks.lock().is_dragging();
        let samples = {
            let mut history = self.history.lock();
            history.push((cx, cy));
            history.as_slice()
        };
        let Some(local_edge) = edge::detect_edge(&samples, self.screen_w, self.screen_h, is_dragging, edge::DEFAULT_DIRECTION_RATIO, CLIENT_MIN_SAMPLES) else {
            return;
        };
        let Some((rx, ry)) = edge::normalize_return_crossing(local_edge, self.neighbor, cx / self.screen_w, cy / self.screen_h) else {
            return; // this edge doesn't face back toward the server
        };
        if self.cross_latch.swap(true, Ordering::SeqCst) {
            return; // already sent, awaiting server ack
        }

        *self.state.lock() = ClientState::Inactive;
        let command = self.command_exchange.lock().clone();
        if let Some(command) = command {
            let mut params = Payload::new();
            params.insert("x".into(), Value::from(rx));
            params.insert("y".into(), Value::from(ry));
            if let Err(e) = command.send_command(CROSS_SCREEN, params, Some(self.neighbor.as_str().into()), Some("server".into())).await {
                log::warn!("failed to send return cross_screen: {e}");
            }
        }
        self.bus.dispatch(EventType::ClientInactive, json!({"x": cx, "y": cy})).await;
    }
}

fn button_from_payload(payload: &Payload) -> Option<MouseButton> {
    match payload.get("button").and_then(Value::as_str) {
        Some("left") => Some(MouseButton::Left),
        Some("right") => Some(MouseButton::Right),
        Some("middle") => Some(MouseButton::Middle),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::BoxFuture;
    use crate::error::CoreResult;
    use tokio::io::duplex;

    struct FakeInjector {
        position: SyncMutex<(f64, f64)>,
    }

    impl FakeInjector {
        fn at(x: f64, y: f64) -> Arc<Self> {
            Arc::new(Self { position: SyncMutex::new((x, y)) })
        }
    }

    impl InputInjector for FakeInjector {
        fn move_relative(&self, dx: f64, dy: f64) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move {
                let mut p = self.position.lock();
                *p = (p.0 + dx, p.1 + dy);
                Ok(())
            })
        }
        fn set_position(&self, x: f64, y: f64) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move {
                *self.position.lock() = (x, y);
                Ok(())
            })
        }
        fn press(&self, _button: MouseButton) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move { Ok(()) })
        }
        fn release(&self, _button: MouseButton) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move { Ok(()) })
        }
        fn click(&self, _button: MouseButton, _count: u32) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move { Ok(()) })
        }
        fn scroll(&self, _dx: f64, _dy: f64) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move { Ok(()) })
        }
        fn key(&self, _key: &str, _pressed: bool) -> BoxFuture<'_, CoreResult<()>> {
            Box::pin(async move { Ok(()) })
        }
        fn current_position(&self) -> (f64, f64) {
            *self.position.lock()
        }
    }

    fn mouse_payload(event: &str, x: f64, y: f64, dx: f64, dy: f64) -> Payload {
        let mut builder = crate::protocol::MessageBuilder::new();
        builder.mouse(x, y, dx, dy, event, false, None, None, None).payload
    }

    fn press_payload(button: &str) -> Payload {
        let mut builder = crate::protocol::MessageBuilder::new();
        let mut payload = builder.mouse(0.0, 0.0, 0.0, 0.0, "press", true, None, None, None).payload;
        payload.insert("button".into(), Value::from(button));
        payload
    }

    async fn command_pair() -> (Arc<MessageExchange>, Arc<MessageExchange>) {
        let (a, b) = duplex(8192);
        let server = MessageExchange::new("server", 60_000, None);
        server.set_writer(Some(Box::new(a))).await;
        let client = MessageExchange::new("client", 60_000, None);
        client.clone().start(Box::new(b));
        (server, client)
    }

    #[tokio::test]
    async fn starts_inactive() {
        let coordinator = ClientEdgeCoordinator::new(EventBus::new(), FakeInjector::at(0.0, 0.0), ScreenPosition::Left, 1920.0, 1080.0);
        assert_eq!(coordinator.state(), ClientState::Inactive);
    }

    #[tokio::test]
    async fn activation_command_moves_to_active_and_sets_position() {
        let injector = FakeInjector::at(0.0, 0.0);
        let coordinator = ClientEdgeCoordinator::new(EventBus::new(), Arc::clone(&injector) as Arc<dyn InputInjector>, ScreenPosition::Left, 1920.0, 1080.0);
        let (server, client) = command_pair().await;
        coordinator.attach(client, None, None);

        let mut params = Payload::new();
        params.insert("x".into(), Value::from(1.0));
        params.insert("y".into(), Value::from(0.5));
        server.send_command(CROSS_SCREEN, params, Some("server".into()), Some("left".into())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(coordinator.state(), ClientState::Active);
        assert_eq!(injector.current_position(), (1920.0, 540.0));
    }

    #[tokio::test]
    async fn inactive_coordinator_drops_inbound_mouse() {
        let injector = FakeInjector::at(5.0, 5.0);
        let coordinator = ClientEdgeCoordinator::new(EventBus::new(), Arc::clone(&injector) as Arc<dyn InputInjector>, ScreenPosition::Left, 1920.0, 1080.0);
        coordinator.on_inbound_mouse(&mouse_payload("move", 0.0, 0.0, 50.0, 0.0)).await;
        assert_eq!(injector.current_position(), (5.0, 5.0));
    }

    #[tokio::test]
    async fn return_edge_sends_cross_screen_and_goes_inactive() {
        // Starting near the left neighbor's right edge; five +300 moves
        // land exactly on x=1919 (screen_w - 1), the edge that faces back
        // toward the server for a "left" neighbor.
        let injector = FakeInjector::at(419.0, 500.0);
        let coordinator = ClientEdgeCoordinator::new(EventBus::new(), Arc::clone(&injector) as Arc<dyn InputInjector>, ScreenPosition::Left, 1920.0, 1080.0);
        let (server, client) = command_pair().await;
        coordinator.attach(client, None, None);
        *coordinator.state.lock() = ClientState::Active;

        for _ in 0..5 {
            coordinator.on_inbound_mouse(&mouse_payload("move", 0.0, 0.0, 300.0, 0.0)).await;
        }

        assert_eq!(coordinator.state(), ClientState::Inactive);
        drop(server);
    }

    #[tokio::test]
    async fn dragging_suppresses_return_crossing() {
        let injector = FakeInjector::at(419.0, 500.0);
        let coordinator = ClientEdgeCoordinator::new(EventBus::new(), Arc::clone(&injector) as Arc<dyn InputInjector>, ScreenPosition::Left, 1920.0, 1080.0);
        let (server, client) = command_pair().await;
        coordinator.attach(client, None, None);
        *coordinator.state.lock() = ClientState::Active;

        coordinator.on_inbound_mouse(&press_payload("left")).await;
        for _ in 0..5 {
            coordinator.on_inbound_mouse(&mouse_payload("move", 0.0, 0.0, 300.0, 0.0)).await;
        }

        assert_eq!(coordinator.state(), ClientState::Active);
        drop(server);
    }
}
