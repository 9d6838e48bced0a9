//! Client-side dial/handshake/reconnect (spec.md §4.D).
//!
//! Unlike the teacher's exponential-backoff reconnect, the spec calls for
//! a fixed wait between attempts — kept as a deliberate, documented
//! divergence (see DESIGN.md).

use super::{transport, ConnectedHook, ConnectionTuning, DisconnectedHook, DynReader, DynWriter, HandshakeTimeouts, TlsClientConfig};
use crate::error::{CoreError, CoreResult};
use crate::exchange::MessageExchange;
use crate::ordered_queue::{OrderedQueue, OrderedQueueConfig};
use crate::protocol::{message_type, MessageBuilder, Payload, ProtocolMessage, ScreenPosition, StreamType};
use crate::registry::{Peer, PeerRegistry};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ClientConnectionConfig {
    pub server_addr: SocketAddr,
    pub tls: TlsClientConfig,
    pub our_position: ScreenPosition,
    pub client_name: Option<String>,
    pub screen_resolution: Option<(u32, u32)>,
    pub additional_streams: Vec<StreamType>,
    /// Fixed delay between reconnect attempts (spec.md §4.D — not
    /// exponential backoff).
    pub wait: std::time::Duration,
    /// `None` means retry forever as long as `auto_reconnect` is true.
    pub max_errors: Option<u32>,
    pub auto_reconnect: bool,
    pub handshake_timeouts: HandshakeTimeouts,
    pub tuning: ConnectionTuning,
}

/// Runs the dial/handshake/session loop until `cancel` fires or the
/// configured error budget is exhausted without `auto_reconnect`.
pub async fn run_client(
    config: ClientConnectionConfig,
    registry: Arc<SyncMutex<PeerRegistry>>,
    connected: ConnectedHook,
    disconnected: DisconnectedHook,
    cancel: CancellationToken,
) -> CoreResult<()> {
    let mut consecutive_errors: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match dial_and_handshake(&config).await {
            Ok(peer) => {
                consecutive_errors = 0;
                let addr = peer.address;
                let position = peer.screen_position;
                let notify = Arc::new(Notify::new());
                if let Some(exchange) = peer.command_stream() {
                    let notify = Arc::clone(&notify);
                    exchange.set_disconnect_hook(Arc::new(move || notify.notify_one()));
                }

                registry.lock().add_peer(peer).map_err(|e| CoreError::Handshake(e.to_string()))?;
                if let Some(peer) = registry.lock().get_by_address_mut(addr) {
                    peer.mark_connected();
                }
                connected(addr, position);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        teardown(&registry, addr, position, &disconnected);
                        return Ok(());
                    }
                    _ = notify.notified() => {
                        teardown(&registry, addr, position, &disconnected);
                    }
                }
            }
            Err(e) => {
                log::warn!("handshake with {} failed: {e}", config.server_addr);
                consecutive_errors += 1;
                if !config.auto_reconnect {
                    if let Some(max) = config.max_errors {
                        if consecutive_errors >= max {
                            return Err(e);
                        }
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(config.wait) => {}
        }
    }
}

fn teardown(registry: &Arc<SyncMutex<PeerRegistry>>, addr: SocketAddr, position: ScreenPosition, disconnected: &DisconnectedHook) {
    if let Some(peer) = registry.lock().get_by_address_mut(addr) {
        peer.mark_disconnected();
    }
    registry.lock().remove_by_address(addr);
    disconnected(addr, position);
}

async fn dial_and_handshake(config: &ClientConnectionConfig) -> CoreResult<Peer> {
    let (mut reader, mut writer, addr) = transport::connect(config.server_addr, &config.tls).await?;

    let offer = timeout(config.handshake_timeouts.initial, MessageExchange::receive_once(&mut reader))
        .await
        .map_err(|_| CoreError::Handshake("timed out waiting for exchange offer".into()))??;
    validate_exchange_offer(&offer, config.our_position)?;

    let resolution_str = config.screen_resolution.map(|(w, h)| format!("{w}x{h}"));
    let mut builder = MessageBuilder::new();
    let ack = builder.exchange(
        config.client_name.as_deref(),
        resolution_str.as_deref(),
        Some(config.our_position.as_str()),
        Payload::new(),
        true,
        matches!(config.tls, TlsClientConfig::Tls(..)),
        config.additional_streams.iter().map(StreamType::code).collect(),
        Some(config.our_position.as_str().into()),
        Some("server".into()),
    );
    timeout(config.handshake_timeouts.initial, crate::protocol::write_frame(&mut writer, &ack))
        .await
        .map_err(|_| CoreError::Handshake("timed out sending exchange ack".into()))??;

    let mut substreams: HashMap<StreamType, (DynReader, DynWriter)> = HashMap::new();
    substreams.insert(StreamType::Command, (reader, writer));

    // Dial additional substreams strictly in the order we listed them:
    // the server's pending-streams queue for our address is FIFO, so the
    // Nth connection we open here is matched to the Nth requested stream
    // (spec.md §4.D "Substream multiplexing").
    for stream_type in &config.additional_streams {
        let (r, w, _) = timeout(config.handshake_timeouts.additional_stream, transport::connect(config.server_addr, &config.tls))
            .await
            .map_err(|_| CoreError::Handshake(format!("timed out dialing additional substream {stream_type:?}")))??;
        substreams.insert(*stream_type, (r, w));
    }

    let mut peer = Peer::new(addr, config.our_position);
    peer.screen_resolution = config.screen_resolution;
    peer.ssl = matches!(config.tls, TlsClientConfig::Tls(..));

    let ordered = Some(OrderedQueue::new(OrderedQueueConfig {
        max_delay_tolerance: config.tuning.max_delay_tolerance,
        parallel_processors: config.tuning.parallel_processors,
        ..Default::default()
    }));

    for (stream_type, (sub_reader, sub_writer)) in substreams {
        let exchange = MessageExchange::new(format!("{}:{:?}", config.our_position.as_str(), stream_type), config.tuning.max_chunk_size, ordered.clone());
        exchange.set_writer(Some(sub_writer)).await;
        exchange.start(sub_reader);
        peer.streams.insert(stream_type, exchange);
    }

    Ok(peer)
}

fn validate_exchange_offer(message: &ProtocolMessage, expected_target: ScreenPosition) -> CoreResult<()> {
    if message.message_type != message_type::EXCHANGE {
        return Err(CoreError::Handshake(format!("expected exchange message, got {:?}", message.message_type)));
    }
    let ack = message.payload.get("ack").and_then(Value::as_bool).unwrap_or(true);
    if ack {
        return Err(CoreError::Handshake("server offer unexpectedly carried ack=true".into()));
    }
    if message.target.as_deref() != Some(expected_target.as_str()) {
        return Err(CoreError::Handshake(format!("offer targeted {:?}, expected {:?}", message.target, expected_target)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_validation_rejects_ack_true_or_wrong_target() {
        let mut builder = MessageBuilder::new();
        let wrong_ack = builder.exchange(None, None, Some("left"), Payload::new(), true, false, vec![], Some("server".into()), Some("left".into()));
        assert!(validate_exchange_offer(&wrong_ack, ScreenPosition::Left).is_err());

        let wrong_target = builder.exchange(None, None, Some("right"), Payload::new(), false, false, vec![], Some("server".into()), Some("right".into()));
        assert!(validate_exchange_offer(&wrong_target, ScreenPosition::Left).is_err());

        let good = builder.exchange(None, None, Some("left"), Payload::new(), false, false, vec![], Some("server".into()), Some("left".into()));
        assert!(validate_exchange_offer(&good, ScreenPosition::Left).is_ok());
    }

    #[test]
    fn additional_stream_codes_preserve_order() {
        let streams = vec![StreamType::Mouse, StreamType::Clipboard, StreamType::Keyboard];
        let codes: Vec<i64> = streams.iter().map(StreamType::code).collect();
        assert_eq!(codes, vec![1, 12, 4]);
    }
}
