//! Server-side accept/handshake/heartbeat (spec.md §4.D).

use super::{transport, ConnectedHook, ConnectionTuning, DisconnectedHook, DynReader, DynWriter, HandshakeTimeouts, TlsServerConfig};
use crate::error::{CoreError, CoreResult};
use crate::exchange::MessageExchange;
use crate::ordered_queue::{OrderedQueue, OrderedQueueConfig};
use crate::protocol::{message_type, MessageBuilder, Payload, ProtocolMessage, ScreenPosition, StreamType};
use crate::registry::{Peer, PeerRegistry};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ServerConnectionConfig {
    pub bind_addr: SocketAddr,
    /// Whitelist of peer addresses allowed to connect, each pinned to a
    /// screen_position (spec.md §4.D "peer address not in whitelist ->
    /// immediate close after accept").
    pub whitelist: HashMap<IpAddr, ScreenPosition>,
    pub tls: TlsServerConfig,
    pub handshake_timeouts: HandshakeTimeouts,
    pub tuning: ConnectionTuning,
}

type PendingSlot = oneshot::Sender<(DynReader, DynWriter)>;
type PendingStreams = Arc<AsyncMutex<HashMap<IpAddr, VecDeque<PendingSlot>>>>;

/// Runs the accept loop until `cancel` fires. Spawns one handshake task
/// per new peer address and routes subsequent accepts from an
/// already-handshaking address into that task's pending-substream queue
/// (spec.md §4.D "Substream multiplexing").
pub async fn run_server(
    config: ServerConnectionConfig,
    registry: Arc<SyncMutex<PeerRegistry>>,
    connected: ConnectedHook,
    disconnected: DisconnectedHook,
    cancel: CancellationToken,
) -> CoreResult<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    log::info!("server listening on {}", config.bind_addr);
    let pending: PendingStreams = Arc::new(AsyncMutex::new(HashMap::new()));

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = transport::accept(&listener, &config.tls) => accepted,
        };

        let (reader, writer, addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                log::warn!("accept error: {e}");
                continue;
            }
        };

        let ip = addr.ip();
        let popped = {
            let mut pending = pending.lock().await;
            let slot = pending.get_mut(&ip).and_then(VecDeque::pop_front);
            if pending.get(&ip).is_some_and(VecDeque::is_empty) {
                pending.remove(&ip);
            }
            slot
        };

        if let Some(slot) = popped {
            let _ = slot.send((reader, writer));
            continue;
        }

        if !config.whitelist.contains_key(&ip) {
            log::warn!("rejecting connection from {ip}: not in whitelist");
            continue;
        }

        let config = config.clone();
        let registry = Arc::clone(&registry);
        let connected = Arc::clone(&connected);
        let disconnected = Arc::clone(&disconnected);
        let pending = Arc::clone(&pending);
        let cancel = cancel.child_token();

        tokio::spawn(async move {
            if let Err(e) = handshake_new_peer(addr, reader, writer, config, registry, pending, connected, disconnected, cancel).await {
                log::warn!("handshake with {addr} failed: {e}");
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn handshake_new_peer(
    addr: SocketAddr,
    mut reader: DynReader,
    mut writer: DynWriter,
    config: ServerConnectionConfig,
    registry: Arc<SyncMutex<PeerRegistry>>,
    pending: PendingStreams,
    connected: ConnectedHook,
    disconnected: DisconnectedHook,
    cancel: CancellationToken,
) -> CoreResult<()> {
    let ip = addr.ip();
    let assigned = *config
        .whitelist
        .get(&ip)
        .ok_or_else(|| CoreError::Handshake(format!("{ip} not in whitelist")))?;

    if registry.lock().get_by_position(assigned).map(|p| p.is_connected).unwrap_or(false) {
        return Err(CoreError::Handshake(format!("{assigned:?} already connected")));
    }

    let mut builder = MessageBuilder::new();
    let offer = builder.exchange(
        None,
        None,
        Some(assigned.as_str()),
        Payload::new(),
        false,
        matches!(config.tls, TlsServerConfig::Tls(_)),
        vec![],
        Some("server".into()),
        Some(assigned.as_str().into()),
    );
    timeout(config.handshake_timeouts.initial, crate::protocol::write_frame(&mut writer, &offer))
        .await
        .map_err(|_| CoreError::Handshake("timed out sending exchange offer".into()))??;

    let reply = timeout(config.handshake_timeouts.initial, MessageExchange::receive_once(&mut reader))
        .await
        .map_err(|_| CoreError::Handshake("timed out waiting for exchange ack".into()))??;

    validate_exchange_ack(&reply, assigned)?;

    let requested = requested_stream_types(&reply);
    let screen_resolution = reply.payload.get("screen_resolution").and_then(Value::as_str).and_then(parse_resolution);
    let ssl = reply.payload.get("ssl").and_then(Value::as_bool).unwrap_or(false);

    let mut substreams: HashMap<StreamType, (DynReader, DynWriter)> = HashMap::new();
    substreams.insert(StreamType::Command, (reader, writer));

    if !requested.is_empty() {
        let mut receivers = Vec::with_capacity(requested.len());
        {
            let mut pending = pending.lock().await;
            let queue = pending.entry(ip).or_default();
            for _ in &requested {
                let (tx, rx) = oneshot::channel();
                queue.push_back(tx);
                receivers.push(rx);
            }
        }

        for (stream_type, rx) in requested.iter().zip(receivers) {
            match timeout(config.handshake_timeouts.additional_stream, rx).await {
                Ok(Ok((r, w))) => {
                    substreams.insert(*stream_type, (r, w));
                }
                _ => {
                    pending.lock().await.remove(&ip);
                    return Err(CoreError::Handshake(format!("additional substream {stream_type:?} did not arrive in time")));
                }
            }
        }
    }

    let mut peer = Peer::new(addr, assigned);
    peer.screen_resolution = screen_resolution;
    peer.ssl = ssl;

    let ordered = Some(OrderedQueue::new(OrderedQueueConfig {
        max_delay_tolerance: config.tuning.max_delay_tolerance,
        parallel_processors: config.tuning.parallel_processors,
        ..Default::default()
    }));

    let disconnect_once = Arc::new(SyncMutex::new(false));
    for (stream_type, (sub_reader, sub_writer)) in substreams {
        let exchange = MessageExchange::new(format!("{}:{:?}", assigned.as_str(), stream_type), config.tuning.max_chunk_size, ordered.clone());
        exchange.set_writer(Some(sub_writer)).await;

        if stream_type == StreamType::Command {
            let disconnected = Arc::clone(&disconnected);
            let registry = Arc::clone(&registry);
            let once = Arc::clone(&disconnect_once);
            exchange.set_disconnect_hook(Arc::new(move || {
                let mut fired = once.lock();
                if *fired {
                    return;
                }
                *fired = true;
                if let Some(peer) = registry.lock().get_by_address_mut(addr) {
                    peer.mark_disconnected();
                }
                disconnected(addr, assigned);
            }));
        }

        exchange.start(sub_reader);
        peer.streams.insert(stream_type, exchange);
    }

    peer.mark_connected();
    registry.lock().add_peer(peer).map_err(|e| CoreError::Handshake(e.to_string()))?;
    connected(addr, assigned);

    spawn_heartbeat(addr, assigned, Arc::clone(&registry), Arc::clone(&disconnected), config.tuning.heartbeat_interval, disconnect_once, cancel);

    Ok(())
}

fn spawn_heartbeat(
    addr: SocketAddr,
    position: ScreenPosition,
    registry: Arc<SyncMutex<PeerRegistry>>,
    disconnected: DisconnectedHook,
    interval: std::time::Duration,
    disconnect_once: Arc<SyncMutex<bool>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let exchange = registry.lock().get_by_address(addr).and_then(|p| p.command_stream().cloned());
            let Some(exchange) = exchange else { return };
            // The write itself doubles as the non-destructive liveness
            // probe (spec.md §4.D heartbeat): a broken pipe fails here
            // before a peer ever observes a missing pong.
            if let Err(e) = exchange.send_heartbeat(Some("server".into()), Some(position.as_str().into())).await {
                log::warn!("heartbeat to {position:?} failed: {e}");
                let mut fired = disconnect_once.lock();
                if !*fired {
                    *fired = true;
                    if let Some(peer) = registry.lock().get_by_address_mut(addr) {
                        peer.mark_disconnected();
                    }
                    disconnected(addr, position);
                }
                return;
            }
        }
    });
}

fn validate_exchange_ack(message: &ProtocolMessage, expected_position: ScreenPosition) -> CoreResult<()> {
    if message.message_type != message_type::EXCHANGE {
        return Err(CoreError::Handshake(format!("expected exchange message, got {:?}", message.message_type)));
    }
    let ack = message.payload.get("ack").and_then(Value::as_bool).unwrap_or(false);
    if !ack {
        return Err(CoreError::Handshake("missing ack in exchange reply".into()));
    }
    if message.source.as_deref() != Some(expected_position.as_str()) {
        return Err(CoreError::Handshake(format!("unexpected source {:?}, expected {:?}", message.source, expected_position)));
    }
    Ok(())
}

fn requested_stream_types(message: &ProtocolMessage) -> Vec<StreamType> {
    message
        .payload
        .get("streams")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_i64).filter_map(StreamType::from_code).collect())
        .unwrap_or_default()
}

fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolution_string() {
        assert_eq!(parse_resolution("1920x1080"), Some((1920, 1080)));
        assert_eq!(parse_resolution("bogus"), None);
    }

    #[test]
    fn requested_streams_filters_unknown_codes() {
        let mut builder = MessageBuilder::new();
        let message = builder.exchange(None, None, None, Payload::new(), true, false, vec![1, 4, 999], None, None);
        assert_eq!(requested_stream_types(&message), vec![StreamType::Mouse, StreamType::Keyboard]);
    }

    #[test]
    fn ack_validation_rejects_missing_ack_or_wrong_source() {
        let mut builder = MessageBuilder::new();
        let no_ack = builder.exchange(None, None, None, Payload::new(), false, false, vec![], Some("left".into()), None);
        assert!(validate_exchange_ack(&no_ack, ScreenPosition::Left).is_err());

        let wrong_source = builder.exchange(None, None, None, Payload::new(), true, false, vec![], Some("right".into()), None);
        assert!(validate_exchange_ack(&wrong_source, ScreenPosition::Left).is_err());

        let good = builder.exchange(None, None, None, Payload::new(), true, false, vec![], Some("left".into()), None);
        assert!(validate_exchange_ack(&good, ScreenPosition::Left).is_ok());
    }
}
