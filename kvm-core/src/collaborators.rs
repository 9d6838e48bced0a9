//! External collaborator interfaces the core consumes (spec.md §6).
//!
//! Platform input capture/injection, the clipboard, and the cursor-overlay
//! subprocess are deliberately out of scope (spec.md §1) — each is a real
//! native integration per OS. The core only needs these narrow contracts;
//! concrete implementations live in the `kvm-server`/`kvm-client` binaries.

use crate::edge::MouseButton;
use crate::error::CoreResult;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One sample from the native input listener (spec.md §6 "InputListener:
/// delivers on_move(x,y), on_click(x,y,button,pressed), on_scroll(x,y,dx,dy)").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Move { x: f64, y: f64 },
    Click { x: f64, y: f64, button: MouseButton, pressed: bool },
    Scroll { x: f64, y: f64, dx: f64, dy: f64 },
    Key { key_code: u32, pressed: bool },
}

/// Native mouse/keyboard capture. Implementations run on their own thread
/// (spec.md §5) and post samples back onto `tx`; suppression of local
/// effects while REMOTE is a platform-specific filter the implementation
/// owns, not a concern of the coordinator that consumes these events.
pub trait InputListener: Send + Sync {
    fn run(self: std::sync::Arc<Self>, tx: mpsc::UnboundedSender<InputEvent>, cancel: CancellationToken) -> BoxFuture<'static, ()>;
}

/// Native input injection on the client (spec.md §6 "InputInjector: move
/// (dx,dy) or position=(x,y); press/release/click(button [,count]);
/// scroll(dx,dy)").
pub trait InputInjector: Send + Sync {
    fn move_relative(&self, dx: f64, dy: f64) -> BoxFuture<'_, CoreResult<()>>;
    fn set_position(&self, x: f64, y: f64) -> BoxFuture<'_, CoreResult<()>>;
    fn press(&self, button: MouseButton) -> BoxFuture<'_, CoreResult<()>>;
    fn release(&self, button: MouseButton) -> BoxFuture<'_, CoreResult<()>>;
    fn click(&self, button: MouseButton, count: u32) -> BoxFuture<'_, CoreResult<()>>;
    fn scroll(&self, dx: f64, dy: f64) -> BoxFuture<'_, CoreResult<()>>;
    fn key(&self, key: &str, pressed: bool) -> BoxFuture<'_, CoreResult<()>>;
    /// Current injected cursor position, used for clamping and
    /// return-edge detection (spec.md §4.G "Cursor clamping").
    fn current_position(&self) -> (f64, f64);
}

/// Clipboard content kind, mirrors the `content_type` wire field
/// (spec.md §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardContentType {
    Text,
    Url,
    File,
}

impl ClipboardContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipboardContentType::Text => "text",
            ClipboardContentType::Url => "url",
            ClipboardContentType::File => "file",
        }
    }
}

/// Watches the local clipboard and posts `(content, content_type)` pairs
/// on change (spec.md §6 "ClipboardMonitor: start()/stop(), callback
/// (content, content_type)").
pub trait ClipboardMonitor: Send + Sync {
    fn run(self: std::sync::Arc<Self>, tx: mpsc::UnboundedSender<(String, ClipboardContentType)>, cancel: CancellationToken) -> BoxFuture<'static, ()>;
}

/// Applies inbound clipboard content to the local clipboard (client/peer
/// side of the multicast clipboard sync).
pub trait ClipboardSetter: Send + Sync {
    fn set(&self, content: &str, content_type: ClipboardContentType) -> BoxFuture<'_, CoreResult<()>>;
}
