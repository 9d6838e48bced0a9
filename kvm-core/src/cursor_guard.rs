//! Cursor Guard Coordinator (spec.md §4.I): mediates the platform cursor
//! overlay on enable/disable and orders the active-screen event so stream
//! handlers always retarget only after the overlay has actually switched.

use crate::error::CoreResult;
use crate::event_bus::{EventBus, EventType};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External collaborator interface for the platform cursor overlay
/// (spec.md §6). The subprocess/pipe plumbing behind an implementation is
/// out of scope for the core.
pub trait CursorOverlay: Send + Sync {
    fn enable_capture(&self) -> BoxFuture<'_, CoreResult<()>>;
    fn disable_capture(&self, x: f64, y: f64) -> BoxFuture<'_, CoreResult<()>>;
}

/// Subscribes to `SCREEN_CHANGE_GUARD` (priority) and `CLIENT_DISCONNECTED`,
/// and wraps the platform [`CursorOverlay`] so its enable/disable calls
/// happen strictly before `ACTIVE_SCREEN_CHANGED` is dispatched — stream
/// handlers must never retarget before the overlay has actually warped the
/// cursor (spec.md §4.G step c, §4.I).
pub struct CursorGuardCoordinator {
    overlay: Arc<dyn CursorOverlay>,
    bus: Arc<EventBus>,
    active_screen: Mutex<Option<String>>,
}

impl CursorGuardCoordinator {
    pub fn new(overlay: Arc<dyn CursorOverlay>, bus: Arc<EventBus>) -> Arc<Self> {
        let coordinator = Arc::new(Self { overlay, bus, active_screen: Mutex::new(None) });
        coordinator.clone().install_subscriptions();
        coordinator
    }

    fn install_subscriptions(self: Arc<Self>) {
        let guard = Arc::clone(&self);
        self.bus.subscribe(
            EventType::ScreenChangeGuard,
            Arc::new(move |data| {
                let guard = Arc::clone(&guard);
                Box::pin(async move { guard.on_screen_change_guard(data).await })
            }),
            true,
        );

        let disconnect = Arc::clone(&self);
        self.bus.subscribe(
            EventType::ClientDisconnected,
            Arc::new(move |data| {
                let disconnect = Arc::clone(&disconnect);
                Box::pin(async move { disconnect.on_client_disconnected(data).await })
            }),
            false,
        );
    }

    /// `data`: `{"active_screen": string|null, "x": f64, "y": f64}`.
    async fn on_screen_change_guard(&self, data: Value) {
        let active_screen = data.get("active_screen").and_then(Value::as_str).map(str::to_string);
        let x = data.get("x").and_then(Value::as_f64).unwrap_or(0.0);
        let y = data.get("y").and_then(Value::as_f64).unwrap_or(0.0);

        match active_screen {
            Some(screen) => {
                if let Err(e) = self.overlay.enable_capture().await {
                    log::error!("cursor overlay failed to enable capture: {e}");
                    return;
                }
                *self.active_screen.lock() = Some(screen.clone());
                self.bus.dispatch(EventType::ActiveScreenChanged, json!({"active_screen": screen, "x": x, "y": y})).await;
            }
            None => {
                if let Err(e) = self.overlay.disable_capture(x, y).await {
                    log::error!("cursor overlay failed to disable capture: {e}");
                    return;
                }
                *self.active_screen.lock() = None;
                self.bus.dispatch(EventType::ActiveScreenChanged, json!({"active_screen": Value::Null, "x": x, "y": y})).await;
            }
        }
    }

    /// `data`: `{"screen_position": string}`. If the disconnected peer was
    /// the currently active one, force-disable the overlay so the real
    /// cursor isn't left parked with no client to drive it.
    async fn on_client_disconnected(&self, data: Value) {
        let disconnected = data.get("screen_position").and_then(Value::as_str);
        let is_active = matches!((disconnected, self.active_screen.lock().as_deref()), (Some(d), Some(a)) if d == a);
        if is_active {
            if let Err(e) = self.overlay.disable_capture(0.0, 0.0).await {
                log::error!("cursor overlay failed to force-disable after disconnect: {e}");
                return;
            }
            *self.active_screen.lock() = None;
            self.bus.dispatch(EventType::ActiveScreenChanged, json!({"active_screen": Value::Null, "x": 0.0, "y": 0.0})).await;
        }
    }

    pub fn current_active_screen(&self) -> Option<String> {
        self.active_screen.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeOverlay {
        enabled: Arc<AtomicUsize>,
        disabled: Arc<AtomicUsize>,
    }

    impl CursorOverlay for FakeOverlay {
        fn enable_capture(&self) -> BoxFuture<'_, CoreResult<()>> {
            self.enabled.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn disable_capture(&self, _x: f64, _y: f64) -> BoxFuture<'_, CoreResult<()>> {
            self.disabled.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn enable_then_dispatches_active_screen_changed() {
        let bus = EventBus::new();
        let enabled = Arc::new(AtomicUsize::new(0));
        let disabled = Arc::new(AtomicUsize::new(0));
        let overlay = Arc::new(FakeOverlay { enabled: Arc::clone(&enabled), disabled: Arc::clone(&disabled) });
        let coordinator = CursorGuardCoordinator::new(overlay, Arc::clone(&bus));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        bus.subscribe(EventType::ActiveScreenChanged, Arc::new(move |_| {
            let seen = Arc::clone(&seen2);
            Box::pin(async move { seen.fetch_add(1, Ordering::SeqCst); })
        }), false);

        bus.dispatch(EventType::ScreenChangeGuard, json!({"active_screen": "left", "x": 0.0, "y": 0.0})).await;
        assert_eq!(enabled.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.current_active_screen(), Some("left".to_string()));
    }

    #[tokio::test]
    async fn disconnect_of_active_peer_forces_disable() {
        let bus = EventBus::new();
        let enabled = Arc::new(AtomicUsize::new(0));
        let disabled = Arc::new(AtomicUsize::new(0));
        let overlay = Arc::new(FakeOverlay { enabled: Arc::clone(&enabled), disabled: Arc::clone(&disabled) });
        let coordinator = CursorGuardCoordinator::new(overlay, Arc::clone(&bus));

        bus.dispatch(EventType::ScreenChangeGuard, json!({"active_screen": "left", "x": 0.0, "y": 0.0})).await;
        bus.dispatch(EventType::ClientDisconnected, json!({"screen_position": "left"})).await;

        assert_eq!(disabled.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.current_active_screen(), None);
    }

    #[tokio::test]
    async fn disconnect_of_inactive_peer_does_not_disable() {
        let bus = EventBus::new();
        let enabled = Arc::new(AtomicUsize::new(0));
        let disabled = Arc::new(AtomicUsize::new(0));
        let overlay = Arc::new(FakeOverlay { enabled: Arc::clone(&enabled), disabled: Arc::clone(&disabled) });
        let coordinator = CursorGuardCoordinator::new(overlay, Arc::clone(&bus));

        bus.dispatch(EventType::ScreenChangeGuard, json!({"active_screen": "left", "x": 0.0, "y": 0.0})).await;
        bus.dispatch(EventType::ClientDisconnected, json!({"screen_position": "right"})).await;

        assert_eq!(disabled.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.current_active_screen(), Some("left".to_string()));
    }
}
