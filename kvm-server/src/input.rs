//! Logging-only stand-ins for the native input/clipboard collaborators
//! (spec.md §6 InputListener/ClipboardMonitor). No platform backend is
//! wired up here — these exist so the binary is runnable end to end
//! without a real capture integration; a platform-specific implementation
//! swaps in behind the same trait.

use kvm_core::collaborators::{BoxFuture, ClipboardContentType, InputEvent, InputListener};
use kvm_core::collaborators::{ClipboardMonitor, ClipboardSetter};
use kvm_core::error::CoreResult;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct LoggingInputListener;

impl InputListener for LoggingInputListener {
    fn run(self: Arc<Self>, _tx: mpsc::UnboundedSender<InputEvent>, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            log::info!("input listener started (no platform backend wired up)");
            cancel.cancelled().await;
            log::info!("input listener stopped");
        })
    }
}

pub struct LoggingClipboardMonitor;

impl ClipboardMonitor for LoggingClipboardMonitor {
    fn run(self: Arc<Self>, _tx: mpsc::UnboundedSender<(String, ClipboardContentType)>, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            log::info!("clipboard monitor started (no platform backend wired up)");
            cancel.cancelled().await;
            log::info!("clipboard monitor stopped");
        })
    }
}

pub struct LoggingClipboardSetter;

impl ClipboardSetter for LoggingClipboardSetter {
    fn set(&self, content: &str, content_type: ClipboardContentType) -> BoxFuture<'_, CoreResult<()>> {
        let content = content.to_string();
        Box::pin(async move {
            log::info!("clipboard set ({:?}): {content}", content_type.as_str());
            Ok(())
        })
    }
}

pub struct LoggingCursorOverlay;

impl kvm_core::cursor_guard::CursorOverlay for LoggingCursorOverlay {
    fn enable_capture(&self) -> kvm_core::cursor_guard::BoxFuture<'_, kvm_core::CoreResult<()>> {
        Box::pin(async move {
            log::info!("cursor overlay: enable_capture");
            Ok(())
        })
    }

    fn disable_capture(&self, x: f64, y: f64) -> kvm_core::cursor_guard::BoxFuture<'_, kvm_core::CoreResult<()>> {
        Box::pin(async move {
            log::info!("cursor overlay: disable_capture at ({x}, {y})");
            Ok(())
        })
    }
}
