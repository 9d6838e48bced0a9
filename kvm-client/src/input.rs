//! Logging-only stand-ins for the native input-injection/clipboard
//! collaborators (spec.md §6 InputInjector/ClipboardSetter). No platform
//! backend is wired up here — these exist so the binary is runnable end
//! to end without a real injection integration.

use kvm_core::collaborators::{BoxFuture, ClipboardContentType, ClipboardSetter, InputInjector};
use kvm_core::edge::MouseButton;
use kvm_core::error::CoreResult;
use parking_lot::Mutex;

pub struct LoggingInputInjector {
    position: Mutex<(f64, f64)>,
}

impl LoggingInputInjector {
    pub fn at(x: f64, y: f64) -> Self {
        Self { position: Mutex::new((x, y)) }
    }
}

impl InputInjector for LoggingInputInjector {
    fn move_relative(&self, dx: f64, dy: f64) -> BoxFuture<'_, CoreResult<()>> {
        Box::pin(async move {
            let mut pos = self.position.lock();
            *pos = (pos.0 + dx, pos.1 + dy);
            log::debug!("move_relative({dx}, {dy}) -> {:?}", *pos);
            Ok(())
        })
    }

    fn set_position(&self, x: f64, y: f64) -> BoxFuture<'_, CoreResult<()>> {
        Box::pin(async move {
            *self.position.lock() = (x, y);
            log::debug!("set_position({x}, {y})");
            Ok(())
        })
    }

    fn press(&self, button: MouseButton) -> BoxFuture<'_, CoreResult<()>> {
        Box::pin(async move {
            log::debug!("press({button:?})");
            Ok(())
        })
    }

    fn release(&self, button: MouseButton) -> BoxFuture<'_, CoreResult<()>> {
        Box::pin(async move {
            log::debug!("release({button:?})");
            Ok(())
        })
    }

    fn click(&self, button: MouseButton, count: u32) -> BoxFuture<'_, CoreResult<()>> {
        Box::pin(async move {
            log::debug!("click({button:?}, count={count})");
            Ok(())
        })
    }

    fn scroll(&self, dx: f64, dy: f64) -> BoxFuture<'_, CoreResult<()>> {
        Box::pin(async move {
            log::debug!("scroll({dx}, {dy})");
            Ok(())
        })
    }

    fn key(&self, key: &str, pressed: bool) -> BoxFuture<'_, CoreResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            log::debug!("key({key:?}, pressed={pressed})");
            Ok(())
        })
    }

    fn current_position(&self) -> (f64, f64) {
        *self.position.lock()
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
