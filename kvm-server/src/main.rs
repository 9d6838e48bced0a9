#[path = "log.rs"]
mod app_log;
mod config;
mod input;
mod tls;

use anyhow::Result;
use config::Config;
use input::{LoggingClipboardMonitor, LoggingClipboardSetter, LoggingCursorOverlay, LoggingInputListener};
use kvm_core::collaborators::{ClipboardMonitor, ClipboardSetter, InputEvent, InputListener};
use kvm_core::connection::server::{run_server, ServerConnectionConfig};
use kvm_core::connection::{ConnectedHook, ConnectionTuning, DisconnectedHook, HandshakeTimeouts};
use kvm_core::coordinator::server::ServerState;
use kvm_core::coordinator::ServerEdgeCoordinator;
use kvm_core::cursor_guard::CursorGuardCoordinator;
use kvm_core::event_bus::{EventBus, EventType};
use kvm_core::protocol::{message_type, ProtocolMessage, StreamType};
use kvm_core::registry::PeerRegistry;
use kvm_core::stream_handlers::{MulticastHandler, MulticastTarget, OutboundEvent};
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    app_log::setup_logger(&log_dir)?;

    let cfg = Config::load()?;
    let tls = tls::load(cfg.tls.as_ref())?;

    let registry = Arc::new(SyncMutex::new(PeerRegistry::new()));
    let bus = EventBus::new();

    let overlay = Arc::new(LoggingCursorOverlay);
    let _cursor_guard = CursorGuardCoordinator::new(overlay, Arc::clone(&bus));

    let coordinator = ServerEdgeCoordinator::new(Arc::clone(&bus), Arc::clone(&registry), cfg.screen_width as f64, cfg.screen_height as f64);

    let clipboard_setter: Arc<dyn ClipboardSetter> = Arc::new(LoggingClipboardSetter);
    let clipboard_multicast = {
        let registry = Arc::clone(&registry);
        MulticastHandler::new("server-clipboard-out", move || {
            registry
                .lock()
                .connected_peers()
                .filter_map(|peer| {
                    peer.stream(StreamType::Clipboard).map(|exchange| MulticastTarget {
                        exchange: Arc::clone(exchange),
                        source: Some("server".into()),
                        target: Some(peer.screen_position.as_str().into()),
                    })
                })
                .collect()
        })
    };

    let connected: ConnectedHook = {
        let registry = Arc::clone(&registry);
        let coordinator = Arc::clone(&coordinator);
        let bus = Arc::clone(&bus);
        let clipboard_multicast = Arc::clone(&clipboard_multicast);
        let clipboard_setter = Arc::clone(&clipboard_setter);
        Arc::new(move |addr, position| {
            let streams = registry.lock().get_by_address(addr).map(|p| p.streams.clone());
            if let Some(streams) = streams {
                if let Some(command) = streams.get(&StreamType::Command) {
                    coordinator.attach_peer(position, command);
                }
                if let Some(clipboard) = streams.get(&StreamType::Clipboard) {
                    register_clipboard_handler(clipboard, Arc::clone(&clipboard_multicast), Arc::clone(&clipboard_setter));
                }
            }
            bus.dispatch_nowait(EventType::ClientConnected, json!({"screen_position": position.as_str()}));
        })
    };

    let disconnected: DisconnectedHook = {
        let bus = Arc::clone(&bus);
        Arc::new(move |_addr, position| {
            bus.dispatch_nowait(EventType::ClientDisconnected, json!({"screen_position": position.as_str()}));
        })
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received");
            cancel.cancel();
        });
    }

    spawn_input_pump(Arc::clone(&coordinator), cancel.child_token());
    spawn_clipboard_pump(clipboard_multicast, cancel.child_token());

    let server_config = ServerConnectionConfig {
        bind_addr: cfg.bind_addr,
        whitelist: cfg.whitelist,
        tls,
        handshake_timeouts: HandshakeTimeouts::default(),
        tuning: ConnectionTuning {
            max_chunk_size: cfg.max_chunk_size,
            heartbeat_interval: cfg.heartbeat_interval,
            max_delay_tolerance: cfg.max_delay_tolerance,
            parallel_processors: cfg.parallel_processors,
        },
    };

    run_server(server_config, registry, connected, disconnected, cancel).await?;
    Ok(())
}

fn register_clipboard_handler(
    clipboard: &Arc<kvm_core::exchange::MessageExchange>,
    multicast: Arc<MulticastHandler>,
    setter: Arc<dyn ClipboardSetter>,
) {
    clipboard.register_handler(
        message_type::CLIPBOARD,
        Arc::new(move |message: ProtocolMessage| {
            let content = message.payload.get("content").and_then(Value::as_str).unwrap_or("").to_string();
            let content_type = message.payload.get("content_type").and_then(Value::as_str).unwrap_or("text").to_string();
            let multicast = Arc::clone(&multicast);
            let setter = Arc::clone(&setter);
            tokio::spawn(async move {
                if let Err(e) = setter.set(&content, parse_content_type(&content_type)).await {
                    log::warn!("clipboard setter failed: {e}");
                }
                if let Err(e) = multicast.send(OutboundEvent::Clipboard { content, content_type }).await {
                    log::warn!("clipboard rebroadcast failed: {e}");
                }
            });
        }),
    );
}

fn parse_content_type(s: &str) -> kvm_core::collaborators::ClipboardContentType {
    use kvm_core::collaborators::ClipboardContentType;
    match s {
        "url" => ClipboardContentType::Url,
        "file" => ClipboardContentType::File,
        _ => ClipboardContentType::Text,
    }
}

/// Feeds local input samples into the edge-crossing coordinator: edge
/// detection while LOCAL, forwarding to the active peer while REMOTE
/// (spec.md §4.G).
fn spawn_input_pump(coordinator: Arc<ServerEdgeCoordinator>, cancel: CancellationToken) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener: Arc<dyn InputListener> = Arc::new(LoggingInputListener);
    tokio::spawn(async move { listener.run(tx, cancel).await });

    tokio::spawn(async move {
        let mut last = (0.0_f64, 0.0_f64);
        let mut dragging = false;
        while let Some(event) = rx.recv().await {
            match event {
                InputEvent::Move { x, y } => {
                    let (dx, dy) = (x - last.0, y - last.1);
                    last = (x, y);
                    match coordinator.state() {
                        ServerState::Local => coordinator.on_local_move(x, y, dragging).await,
                        ServerState::Remote(_) => {
                            coordinator
                                .forward_mouse(OutboundEvent::Mouse { x, y, dx, dy, event: "move".into(), is_pressed: dragging })
                                .await;
                        }
                    }
                }
                InputEvent::Click { x, y, pressed, .. } => {
                    dragging = pressed;
                    if coordinator.state() != ServerState::Local {
                        let event = if pressed { "press" } else { "release" };
                        coordinator
                            .forward_mouse(OutboundEvent::Mouse { x, y, dx: 0.0, dy: 0.0, event: event.into(), is_pressed: pressed })
                            .await;
                    }
                }
                InputEvent::Scroll { x, y, dx, dy } => {
                    if coordinator.state() != ServerState::Local {
                        coordinator.forward_mouse(OutboundEvent::Mouse { x, y, dx, dy, event: "scroll".into(), is_pressed: false }).await;
                    }
                }
                InputEvent::Key { key_code, pressed } => {
                    if coordinator.state() != ServerState::Local {
                        let event = if pressed { "press" } else { "release" };
                        coordinator.forward_keyboard(OutboundEvent::Keyboard { key: key_code.to_string(), event: event.into() }).await;
                    }
                }
            }
        }
    });
}

fn spawn_clipboard_pump(multicast: Arc<MulticastHandler>, cancel: CancellationToken) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let monitor: Arc<dyn ClipboardMonitor> = Arc::new(LoggingClipboardMonitor);
    tokio::spawn(async move { monitor.run(tx, cancel).await });

    tokio::spawn(async move {
        while let Some((content, content_type)) = rx.recv().await {
            let content_type = content_type.as_str().to_string();
            if let Err(e) = multicast.send(OutboundEvent::Clipboard { content, content_type }).await {
                log::warn!("local clipboard broadcast failed: {e}");
            }
        }
    });
}
