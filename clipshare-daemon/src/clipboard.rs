//! System clipboard access through arboard

use arboard::Clipboard;
use clipshare_protocol::ClipboardProvider;
use tracing::{debug, warn};

/// [`ClipboardProvider`] backed by the desktop clipboard
///
/// A handle is opened per call; arboard handles are tied to the
/// display connection and are not shared across tasks.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }

    fn open() -> Option<Clipboard> {
        match Clipboard::new() {
            Ok(clipboard) => Some(clipboard),
            Err(e) => {
                warn!("Failed to open system clipboard: {}", e);
                None
            }
        }
    }
}

impl ClipboardProvider for SystemClipboard {
    fn get_text(&self) -> String {
        let Some(mut clipboard) = Self::open() else {
            return String::new();
        };
        match clipboard.get_text() {
            Ok(text) => text,
            Err(e) => {
                // Empty or non-text content
                debug!("No clipboard text: {}", e);
                String::new()
            }
        }
    }

    fn set_text(&self, text: &str) {
        let Some(mut clipboard) = Self::open() else {
            return;
        };
        if let Err(e) = clipboard.set_text(text) {
            warn!("Failed to write system clipboard: {}", e);
        }
    }
}
