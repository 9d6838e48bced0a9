//! Stream handlers (spec.md §4.F): bind one substream to a role — a
//! single active peer for unidirectional/bidirectional handlers, or every
//! connected peer for the multicast handler used by clipboard sync.

use crate::error::{CoreError, CoreResult};
use crate::exchange::{Handler, MessageExchange};
use crate::protocol::Payload;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Default bound on a handler's outbound send queue (spec.md §4.F, §5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// A queued outbound event, carrying enough to call the matching typed
/// `MessageExchange::send_*` once a peer is bound. Mirrors the original's
/// "if `data` has a `to_dict` shape, convert it" contract: callers build
/// one of these from their own event type before calling `send`.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Mouse { x: f64, y: f64, dx: f64, dy: f64, event: String, is_pressed: bool },
    Keyboard { key: String, event: String },
    Clipboard { content: String, content_type: String },
    Command { command: String, params: Payload },
}

impl OutboundEvent {
    async fn send_via(&self, exchange: &MessageExchange, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        match self {
            OutboundEvent::Mouse { x, y, dx, dy, event, is_pressed } => {
                exchange.send_mouse(*x, *y, *dx, *dy, event, *is_pressed, source, target).await
            }
            OutboundEvent::Keyboard { key, event } => exchange.send_keyboard(key, event, source, target).await,
            OutboundEvent::Clipboard { content, content_type } => exchange.send_clipboard(content, content_type, source, target).await,
            OutboundEvent::Command { command, params } => exchange.send_command(command, params.clone(), source, target).await,
        }
    }
}

struct Binding {
    exchange: Arc<MessageExchange>,
    source: Option<String>,
    target: Option<String>,
}

/// Binds one outbound substream to at most one peer at a time. Used for
/// both server→client and client→server unidirectional roles — the
/// direction only affects what the caller passes as `source`/`target`
/// when rebinding.
pub struct UnidirectionalHandler {
    label: String,
    tx: mpsc::Sender<OutboundEvent>,
    rx: Arc<AsyncMutex<mpsc::Receiver<OutboundEvent>>>,
    binding: Arc<SyncMutex<Option<Binding>>>,
}

impl UnidirectionalHandler {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Self::with_capacity(label, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(label: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handler = Arc::new(Self {
            label: label.into(),
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            binding: Arc::new(SyncMutex::new(None)),
        });
        handler.clone().spawn_sender();
        handler
    }

    fn spawn_sender(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = self.rx.lock().await;
                    rx.recv().await
                };
                let Some(event) = item else { return };
                let binding = self.binding.lock().as_ref().map(|b| (Arc::clone(&b.exchange), b.source.clone(), b.target.clone()));
                match binding {
                    Some((exchange, source, target)) => {
                        if let Err(e) = event.send_via(&exchange, source, target).await {
                            log::warn!("[{}] send failed: {e}", self.label);
                        }
                    }
                    // No peer active: the sender task idles, dropping what
                    // it can't deliver (spec.md §4.F).
                    None => log::trace!("[{}] dropped event, no peer bound", self.label),
                }
            }
        });
    }

    /// Enqueue one outbound event. Blocks briefly if the queue is full
    /// (cooperative backpressure, spec.md §5).
    pub async fn send(&self, event: OutboundEvent) -> CoreResult<()> {
        self.tx.send(event).await.map_err(|_| CoreError::Transport("stream handler channel closed".into()))
    }

    /// Rebind to a new peer (or to no peer), clearing any events still
    /// queued for the old binding — input meant for one peer must never
    /// leak to another after a rebind (spec.md §4.F, §8 S8).
    pub async fn rebind(&self, exchange: Option<Arc<MessageExchange>>, source: Option<String>, target: Option<String>) {
        {
            let mut rx = self.rx.lock().await;
            while rx.try_recv().is_ok() {}
        }
        *self.binding.lock() = exchange.map(|exchange| Binding { exchange, source, target });
    }

    pub fn is_bound(&self) -> bool {
        self.binding.lock().is_some()
    }
}

/// A unidirectional handler plus a registered receive callback on the
/// currently bound substream (spec.md §4.F "Bidirectional").
pub struct BidirectionalHandler {
    outbound: Arc<UnidirectionalHandler>,
    message_type: String,
    receive_handler: Handler,
}

impl BidirectionalHandler {
    pub fn new(label: impl Into<String>, message_type: impl Into<String>, receive_handler: Handler) -> Self {
        Self { outbound: UnidirectionalHandler::new(label), message_type: message_type.into(), receive_handler }
    }

    pub async fn send(&self, event: OutboundEvent) -> CoreResult<()> {
        self.outbound.send(event).await
    }

    /// Rebind the send side and (re-)register the receive handler on the
    /// newly bound exchange, since handlers live on the `MessageExchange`
    /// instance itself.
    pub async fn rebind(&self, exchange: Option<Arc<MessageExchange>>, source: Option<String>, target: Option<String>) {
        if let Some(exchange) = &exchange {
            exchange.register_handler(self.message_type.clone(), Arc::clone(&self.receive_handler));
        }
        self.outbound.rebind(exchange, source, target).await;
    }

    pub fn is_bound(&self) -> bool {
        self.outbound.is_bound()
    }
}

/// Broadcasts each queued event to every currently connected peer's
/// bound substream, rather than only the active one — used for clipboard
/// sync (spec.md §4.F "Multicast").
pub struct MulticastHandler {
    label: String,
    tx: mpsc::Sender<OutboundEvent>,
}

/// One multicast destination: the substream plus the source/target labels
/// to stamp on outgoing messages.
pub struct MulticastTarget {
    pub exchange: Arc<MessageExchange>,
    pub source: Option<String>,
    pub target: Option<String>,
}

impl MulticastHandler {
    pub fn new<F>(label: impl Into<String>, targets: F) -> Arc<Self>
    where
        F: Fn() -> Vec<MulticastTarget> + Send + Sync + 'static,
    {
        Self::with_capacity(label, DEFAULT_QUEUE_CAPACITY, targets)
    }

    pub fn with_capacity<F>(label: impl Into<String>, capacity: usize, targets: F) -> Arc<Self>
    where
        F: Fn() -> Vec<MulticastTarget> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handler = Arc::new(Self { label: label.into(), tx });
        spawn_multicast_sender(handler.label.clone(), rx, targets);
        handler
    }

    pub async fn send(&self, event: OutboundEvent) -> CoreResult<()> {
        self.tx.send(event).await.map_err(|_| CoreError::Transport("multicast handler channel closed".into()))
    }
}

fn spawn_multicast_sender<F>(label: String, mut rx: mpsc::Receiver<OutboundEvent>, targets: F)
where
    F: Fn() -> Vec<MulticastTarget> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            for target in targets() {
                if let Err(e) = event.send_via(&target.exchange, target.source.clone(), target.target.clone()).await {
                    log::warn!("[{label}] multicast send failed: {e}");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message_type;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::duplex;

    fn loopback_exchange(label: &str) -> Arc<MessageExchange> {
        let exchange = MessageExchange::new(label, 4096, None);
        let (client, server) = duplex(8192);
        // We only need the writer side for these tests; drop the read
        // half into a sink task so frames don't back up the pipe.
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
        let exchange_clone = Arc::clone(&exchange);
        tokio::spawn(async move {
            exchange_clone.set_writer(Some(Box::new(client))).await;
        });
        exchange
    }

    #[tokio::test]
    async fn events_queued_before_bind_are_dropped_on_rebind() {
        let handler = UnidirectionalHandler::new("test");
        handler.send(OutboundEvent::Keyboard { key: "a".into(), event: "press".into() }).await.unwrap();
        handler.send(OutboundEvent::Keyboard { key: "b".into(), event: "press".into() }).await.unwrap();

        let exchange = loopback_exchange("bound");
        let sent = Arc::new(AtomicUsize::new(0));
        let sent2 = Arc::clone(&sent);
        exchange.register_handler(message_type::KEYBOARD, Arc::new(move |_| {
            sent2.fetch_add(1, Ordering::SeqCst);
        }));

        handler.rebind(Some(exchange), Some("server".into()), Some("left".into())).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        // Neither pre-bind event should have leaked through after rebind
        // (spec.md §8 S8 "no cross-peer leakage").
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unbound_handler_drops_rather_than_blocks() {
        let handler = UnidirectionalHandler::new("idle");
        // Should not hang even though nothing is ever bound.
        handler.send(OutboundEvent::Keyboard { key: "a".into(), event: "press".into() }).await.unwrap();
        assert!(!handler.is_bound());
    }
}
