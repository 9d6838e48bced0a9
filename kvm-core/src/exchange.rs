//! Message Exchange (spec.md §4.C): one instance per substream. Owns
//! framing, chunking/reassembly, an optional ordered-delivery queue, and
//! a per-`message_type` handler registry.

use crate::error::{CoreError, CoreResult};
use crate::ordered_queue::OrderedQueue;
use crate::protocol::{self, ChunkReassembler, MessageBuilder, Payload, ProtocolMessage};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type DynReader = Box<dyn AsyncRead + Unpin + Send>;
pub type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;
pub type Handler = Arc<dyn Fn(ProtocolMessage) + Send + Sync>;

/// Invoked when the background receive loop observes a transport error or
/// EOF (spec.md §4.C "signals disconnection upward").
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

/// One substream's framing/chunking/dispatch state.
///
/// `set_transport` in the spec corresponds here to constructing the
/// exchange with a writer (via [`MessageExchange::set_writer`]) and
/// separately calling [`MessageExchange::start`] with a reader; either
/// may be omitted to disable that direction, matching the spec's "either
/// may be nil" contract.
pub struct MessageExchange {
    label: String,
    max_chunk_size: usize,
    builder: SyncMutex<MessageBuilder>,
    writer: AsyncMutex<Option<DynWriter>>,
    handlers: RwLock<HashMap<String, Handler>>,
    reassembler: SyncMutex<ChunkReassembler>,
    ordered: Option<Arc<OrderedQueue>>,
    cancel: CancellationToken,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
    on_disconnect: SyncMutex<Option<DisconnectHook>>,
}

impl MessageExchange {
    pub fn new(label: impl Into<String>, max_chunk_size: usize, ordered: Option<Arc<OrderedQueue>>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            max_chunk_size,
            builder: SyncMutex::new(MessageBuilder::new()),
            writer: AsyncMutex::new(None),
            handlers: RwLock::new(HashMap::new()),
            reassembler: SyncMutex::new(ChunkReassembler::new()),
            ordered,
            cancel: CancellationToken::new(),
            tasks: SyncMutex::new(Vec::new()),
            on_disconnect: SyncMutex::new(None),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn set_writer(&self, writer: Option<DynWriter>) {
        *self.writer.lock().await = writer;
    }

    pub fn set_disconnect_hook(&self, hook: DisconnectHook) {
        *self.on_disconnect.lock() = Some(hook);
    }

    pub fn register_handler(&self, message_type: impl Into<String>, handler: Handler) {
        self.handlers.write().insert(message_type.into(), handler);
    }

    /// Dispatch a fully reassembled message to its registered handler. A
    /// type with no handler is logged and dropped — not fatal
    /// (spec.md §4.C).
    fn dispatch(&self, message: ProtocolMessage) {
        let handler = self.handlers.read().get(&message.message_type).cloned();
        match handler {
            Some(handler) => handler(message),
            None => log::debug!("[{}] no handler for message_type {:?}, dropping", self.label, message.message_type),
        }
    }

    /// Feed one inbound frame through chunk reassembly (a no-op for
    /// non-chunked frames) and route the result to the ordered queue or
    /// directly to `dispatch`.
    fn route(self: &Arc<Self>, message: ProtocolMessage) {
        if message.is_chunk {
            let reconstructed = {
                let mut reassembler = self.reassembler.lock();
                reassembler.accept(message)
            };
            match reconstructed {
                Ok(Some(message)) => self.route_ready(message),
                Ok(None) => {}
                Err(e) => log::warn!("[{}] chunk reassembly error: {e}", self.label),
            }
        } else {
            self.route_ready(message);
        }
    }

    fn route_ready(self: &Arc<Self>, message: ProtocolMessage) {
        match &self.ordered {
            Some(queue) => queue.enqueue(message),
            None => self.dispatch(message),
        }
    }

    /// Begin the background receive loop over `reader`. Idempotent only in
    /// the sense that calling it twice spawns two loops — callers are
    /// expected to call it once per substream lifetime.
    pub fn start(self: &Arc<Self>, reader: DynReader) {
        let exchange = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            exchange.receive_loop(reader, cancel).await;
        });
        self.tasks.lock().push(handle);

        if let Some(queue) = self.ordered.clone() {
            let exchange = Arc::clone(self);
            let handles = queue.spawn(move |message| exchange.dispatch(message), self.cancel.clone());
            self.tasks.lock().extend(handles);
        }
    }

    async fn receive_loop(self: Arc<Self>, mut reader: DynReader, cancel: CancellationToken) {
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                r = protocol::read_frame(&mut reader) => r,
            };
            match read {
                Ok(message) => {
                    self.reassembler.lock().sweep_expired();
                    self.route(message);
                }
                Err(CoreError::Decode(e)) => {
                    // A bad frame does not kill the loop (spec.md §4.C /
                    // §8.4) — log it and read the next frame boundary.
                    log::warn!("[{}] decode error: {e}", self.label);
                }
                Err(e) => {
                    log::info!("[{}] transport closed: {e}", self.label);
                    if let Some(hook) = self.on_disconnect.lock().clone() {
                        hook();
                    }
                    return;
                }
            }
        }
    }

    /// Halt the receive loop and any ordered-queue workers, and clear
    /// chunk-reassembly state.
    pub fn stop(&self) {
        self.cancel.cancel();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        *self.reassembler.lock() = ChunkReassembler::new();
    }

    /// One-shot synchronous read used only during handshake (spec.md
    /// §4.C `receive(instant=true)`). Bypasses ordering; reassembles
    /// chunks inline if the first frame happens to be chunked.
    pub async fn receive_once<R: AsyncRead + Unpin>(reader: &mut R) -> CoreResult<ProtocolMessage> {
        let mut reassembler = ChunkReassembler::new();
        loop {
            let message = protocol::read_frame(reader).await?;
            if !message.is_chunk {
                return Ok(message);
            }
            if let Some(reconstructed) = reassembler.accept(message)? {
                return Ok(reconstructed);
            }
        }
    }

    async fn emit(&self, message: ProtocolMessage) -> CoreResult<()> {
        let chunks = {
            let mut builder = self.builder.lock();
            builder.chunk_message(&message, self.max_chunk_size)?
        };
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                for chunk in &chunks {
                    protocol::write_frame(writer, chunk).await?;
                }
                Ok(())
            }
            // Absence of a writer disables this direction rather than
            // failing the caller (spec.md §4.C `set_transport`).
            None => {
                log::debug!("[{}] send with no writer installed, dropping", self.label);
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_mouse(
        &self,
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
        event: &str,
        is_pressed: bool,
        source: Option<String>,
        target: Option<String>,
    ) -> CoreResult<()> {
        let message = self.builder.lock().mouse(x, y, dx, dy, event, is_pressed, source, target, None);
        self.emit(message).await
    }

    pub async fn send_keyboard(&self, key: &str, event: &str, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        let message = self.builder.lock().keyboard(key, event, source, target);
        self.emit(message).await
    }

    pub async fn send_clipboard(&self, content: &str, content_type: &str, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        let message = self.builder.lock().clipboard(content, content_type, source, target);
        self.emit(message).await
    }

    pub async fn send_command(&self, command: &str, params: Payload, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        let message = self.builder.lock().command(command, params, source, target);
        self.emit(message).await
    }

    pub async fn send_screen(&self, command: &str, data: Payload, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        let message = self.builder.lock().screen(command, data, source, target);
        self.emit(message).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_exchange(
        &self,
        client_name: Option<&str>,
        screen_resolution: Option<&str>,
        screen_position: Option<&str>,
        additional_params: Payload,
        ack: bool,
        ssl: bool,
        streams: Vec<i64>,
        source: Option<String>,
        target: Option<String>,
    ) -> CoreResult<()> {
        let message = self
            .builder
            .lock()
            .exchange(client_name, screen_resolution, screen_position, additional_params, ack, ssl, streams, source, target);
        self.emit(message).await
    }

    pub async fn send_heartbeat(&self, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        let message = self.builder.lock().heartbeat(source, target);
        self.emit(message).await
    }

    /// Escape hatch for arbitrary message_type/payload combinations
    /// (`send_custom_message` in the original), e.g. for diagnostics.
    pub async fn send_custom(&self, message_type: &str, payload: Payload, source: Option<String>, target: Option<String>) -> CoreResult<()> {
        let message = self.builder.lock().custom(message_type, payload, source, target);
        self.emit(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_without_writer_is_a_silent_no_op() {
        let exchange = MessageExchange::new("test", 4096, None);
        let result = exchange.send_heartbeat(None, None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler_over_a_loopback_pipe() {
        let exchange = MessageExchange::new("test", 4096, None);
        let received = Arc::new(AtomicUsize::new(0));
        let received2 = Arc::clone(&received);
        exchange.register_handler(protocol::message_type::KEYBOARD, Arc::new(move |_msg| {
            received2.fetch_add(1, Ordering::SeqCst);
        }));

        let (client, server) = duplex(4096);
        exchange.set_writer(Some(Box::new(client))).await;
        exchange.clone().start(Box::new(server));

        exchange.send_keyboard("a", "press", None, None).await.unwrap();
        // Give the background receive task a moment to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
        exchange.stop();
    }

    #[tokio::test]
    async fn unregistered_type_is_dropped_not_fatal() {
        let exchange = MessageExchange::new("test", 4096, None);
        let (client, server) = duplex(4096);
        exchange.set_writer(Some(Box::new(client))).await;
        exchange.clone().start(Box::new(server));

        exchange.send_keyboard("a", "press", None, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // No panic, no handler invoked — the loop is still alive.
        exchange.send_heartbeat(None, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        exchange.stop();
    }
}
