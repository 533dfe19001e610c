//! write-only clipboard access for code block copy buttons.

use std::sync::Arc;

use bevy::prelude::*;

#[derive(thiserror::Error, Debug)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard write failed: {0}")]
    Write(String),
}

pub trait ClipboardSink: Send + Sync {
    /// `Ok` means the write was issued. sinks backed by an async api may still
    /// reject it later; those rejections are only logged.
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// clipboard used by the chat view; swap the sink to redirect copies.
#[derive(Resource, Clone)]
pub struct Clipboard(pub Arc<dyn ClipboardSink>);

impl Default for Clipboard {
    fn default() -> Self {
        Self(Arc::new(SystemClipboard))
    }
}

impl Clipboard {
    /// places `text` on the clipboard verbatim. failures are logged and
    /// reported as `false`, never propagated.
    pub fn copy(&self, text: &str) -> bool {
        match self.0.set_text(text) {
            Ok(()) => {
                debug!(target: "bevy_genai_chat", "copied {} chars to clipboard", text.len());
                true
            }
            Err(err) => {
                debug!(target: "bevy_genai_chat", "copy skipped: {err}");
                false
            }
        }
    }
}

pub struct SystemClipboard;

#[cfg(not(target_arch = "wasm32"))]
thread_local! {
    // x11/wayland drop the selection when the owning handle goes away
    static NATIVE: std::cell::RefCell<Option<arboard::Clipboard>> = const { std::cell::RefCell::new(None) };
}

#[cfg(not(target_arch = "wasm32"))]
impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        NATIVE.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                let cb = arboard::Clipboard::new()
                    .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
                *slot = Some(cb);
            }
            match slot.as_mut() {
                Some(cb) => cb
                    .set_text(text.to_string())
                    .map_err(|e| ClipboardError::Write(e.to_string())),
                None => Err(ClipboardError::Unavailable("not initialized".into())),
            }
        })
    }
}

// navigator.clipboard settles later: a rejected write still reports `Ok`
// here (so the view shows "copied!") and surfaces as a warning.
#[cfg(target_arch = "wasm32")]
impl ClipboardSink for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let window = web_sys::window()
            .ok_or_else(|| ClipboardError::Unavailable("no window".into()))?;
        let promise = window.navigator().clipboard().write_text(text);
        wasm_bindgen_futures::spawn_local(async move {
            let result: Result<wasm_bindgen::JsValue, wasm_bindgen::JsValue> =
                wasm_bindgen_futures::JsFuture::from(promise).await;
            if let Err(err) = result {
                warn!(target: "bevy_genai_chat", "clipboard write rejected: {:?}", err);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    pub struct MemoryClipboard {
        pub writes: Arc<Mutex<Vec<String>>>,
    }

    impl ClipboardSink for MemoryClipboard {
        fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
            self.writes.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    pub struct BrokenClipboard;

    impl ClipboardSink for BrokenClipboard {
        fn set_text(&self, _text: &str) -> Result<(), ClipboardError> {
            Err(ClipboardError::Unavailable("headless".into()))
        }
    }
}
