#[path = "log.rs"]
mod app_log;
mod config;
mod input;
mod tls;

use anyhow::Result;
use config::Config;
use input::{LoggingClipboardSetter, LoggingInputInjector};
use kvm_core::collaborators::{ClipboardContentType, ClipboardMonitor, ClipboardSetter, InputInjector};
use kvm_core::connection::client::{run_client, ClientConnectionConfig};
use kvm_core::connection::{ConnectedHook, ConnectionTuning, DisconnectedHook, HandshakeTimeouts};
use kvm_core::coordinator::ClientEdgeCoordinator;
use kvm_core::event_bus::{EventBus, EventType};
use kvm_core::exchange::MessageExchange;
use kvm_core::protocol::{message_type, ProtocolMessage, StreamType};
use kvm_core::registry::PeerRegistry;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type SharedClipboardStream = Arc<SyncMutex<Option<Arc<MessageExchange>>>>;

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    app_log::setup_logger(&log_dir)?;

    let cfg = Config::load()?;
    let tls = tls::load(cfg.tls.as_ref(), &cfg.server_addr.ip().to_string())?;

    let registry = Arc::new(SyncMutex::new(PeerRegistry::new()));
    let bus = EventBus::new();

    let injector: Arc<dyn InputInjector> =
        Arc::new(LoggingInputInjector::at(cfg.screen_width as f64 / 2.0, cfg.screen_height as f64 / 2.0));
    let coordinator = ClientEdgeCoordinator::new(Arc::clone(&bus), Arc::clone(&injector), cfg.screen_position, cfg.screen_width as f64, cfg.screen_height as f64);

    let clipboard_setter: Arc<dyn ClipboardSetter> = Arc::new(LoggingClipboardSetter);
    let clipboard_stream: SharedClipboardStream = Arc::new(SyncMutex::new(None));

    let connected: ConnectedHook = {
        let registry = Arc::clone(&registry);
        let coordinator = Arc::clone(&coordinator);
        let bus = Arc::clone(&bus);
        let clipboard_setter = Arc::clone(&clipboard_setter);
        let clipboard_stream = Arc::clone(&clipboard_stream);
        Arc::new(move |addr, position| {
            let streams = registry.lock().get_by_address(addr).map(|p| p.streams.clone());
            if let Some(streams) = streams {
                if let Some(command) = streams.get(&StreamType::Command) {
                    let mouse = streams.get(&StreamType::Mouse).cloned();
                    let keyboard = streams.get(&StreamType::Keyboard).cloned();
                    coordinator.attach(Arc::clone(command), mouse, keyboard);
                }
                if let Some(clipboard) = streams.get(&StreamType::Clipboard) {
                    *clipboard_stream.lock() = Some(Arc::clone(clipboard));
                    register_clipboard_handler(clipboard, Arc::clone(&clipboard_setter));
                }
            }
            bus.dispatch_nowait(EventType::ClientConnected, json!({"screen_position": position.as_str()}));
        })
    };

    let disconnected: DisconnectedHook = {
        let bus = Arc::clone(&bus);
        let clipboard_stream = Arc::clone(&clipboard_stream);
        Arc::new(move |_addr, position| {
            *clipboard_stream.lock() = None;
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

    spawn_clipboard_pump(clipboard_stream, cfg.screen_position, cancel.child_token());

    let client_config = ClientConnectionConfig {
        server_addr: cfg.server_addr,
        tls,
        our_position: cfg.screen_position,
        client_name: cfg.client_name,
        screen_resolution: Some((cfg.screen_width, cfg.screen_height)),
        additional_streams: cfg.additional_streams,
        wait: cfg.wait,
        max_errors: cfg.max_errors,
        auto_reconnect: cfg.auto_reconnect,
        handshake_timeouts: HandshakeTimeouts::default(),
        tuning: ConnectionTuning {
            max_chunk_size: cfg.max_chunk_size,
            heartbeat_interval: cfg.heartbeat_interval,
            max_delay_tolerance: cfg.max_delay_tolerance,
            parallel_processors: cfg.parallel_processors,
        },
    };

    run_client(client_config, registry, connected, disconnected, cancel).await?;
    Ok(())
}

fn register_clipboard_handler(clipboard: &Arc<MessageExchange>, setter: Arc<dyn ClipboardSetter>) {
    clipboard.register_handler(
        message_type::CLIPBOARD,
        Arc::new(move |message: ProtocolMessage| {
            let content = message.payload.get("content").and_then(Value::as_str).unwrap_or("").to_string();
            let content_type = message.payload.get("content_type").and_then(Value::as_str).unwrap_or("text").to_string();
            let setter = Arc::clone(&setter);
            tokio::spawn(async move {
                if let Err(e) = setter.set(&content, parse_content_type(&content_type)).await {
                    log::warn!("clipboard setter failed: {e}");
                }
            });
        }),
    );
}

fn parse_content_type(s: &str) -> ClipboardContentType {
    match s {
        "url" => ClipboardContentType::Url,
        "file" => ClipboardContentType::File,
        _ => ClipboardContentType::Text,
    }
}

/// Forwards local clipboard changes to the server over whichever
/// clipboard substream is currently live, dropping samples observed
/// while disconnected (spec.md §4.F "Multicast" — the client's half is a
/// single unidirectional send, not a multicast fan-out).
fn spawn_clipboard_pump(stream: SharedClipboardStream, position: kvm_core::protocol::ScreenPosition, cancel: CancellationToken) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let monitor: Arc<dyn ClipboardMonitor> = Arc::new(input::LoggingClipboardMonitor);
    tokio::spawn(async move { monitor.run(tx, cancel).await });

    tokio::spawn(async move {
        while let Some((content, content_type)) = rx.recv().await {
            let exchange = stream.lock().clone();
            let Some(exchange) = exchange else {
                log::trace!("dropping local clipboard update, not connected");
                continue;
            };
            if let Err(e) = exchange
                .send_clipboard(&content, content_type.as_str(), Some(position.as_str().into()), Some("server".into()))
                .await
            {
                log::warn!("failed to send clipboard update: {e}");
            }
        }
    });
}
