//! User settings and the collaborator interfaces the core consumes
//!
//! The system clipboard and the settings store live outside this crate.
//! Hosts plug them in through [`ClipboardProvider`] and [`SettingsStore`].

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Default HTTP server base port
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Which discovery adapter to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// mDNS / DNS-SD service advertisement
    #[default]
    Mdns,
    /// UDP multicast beacons
    Multicast,
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub device_name: String,
    pub server_port: u16,
    pub auto_start: bool,
    pub discovery_method: DiscoveryMethod,
    pub keep_history: bool,
    /// Days to keep history; -1 keeps forever
    pub history_retention_days: i64,
    pub max_history_items: usize,
}

impl Settings {
    pub fn with_device_name(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Default::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: "Clipshare Device".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            auto_start: true,
            discovery_method: DiscoveryMethod::Mdns,
            keep_history: true,
            history_retention_days: -1,
            max_history_items: crate::history::DEFAULT_MAX_HISTORY_ITEMS,
        }
    }
}

/// Durable settings storage
pub trait SettingsStore: Send + Sync {
    /// Stored settings, or `None` when nothing was saved yet or the store
    /// is unreadable
    fn load(&self) -> Option<Settings>;

    /// Persist `settings`; returns false on failure
    fn save(&self, settings: &Settings) -> bool;
}

/// Access to the system clipboard
pub trait ClipboardProvider: Send + Sync {
    /// Current clipboard text; empty when the clipboard holds no text
    fn get_text(&self) -> String;

    fn set_text(&self, text: &str);
}

/// Clipboard kept in process memory
///
/// Used by tests and by hosts without a graphical session.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardProvider for MemoryClipboard {
    fn get_text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_text(&self, text: &str) {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server_port, 8080);
        assert!(settings.auto_start);
        assert_eq!(settings.discovery_method, DiscoveryMethod::Mdns);
        assert_eq!(settings.history_retention_days, -1);
        assert_eq!(settings.max_history_items, 100);
    }

    #[test]
    fn test_memory_clipboard() {
        let clipboard = MemoryClipboard::new();
        assert_eq!(clipboard.get_text(), "");
        clipboard.set_text("copied");
        assert_eq!(clipboard.get_text(), "copied");
    }

    #[test]
    fn test_discovery_method_serde() {
        let json = serde_json::to_string(&DiscoveryMethod::Multicast).unwrap();
        assert_eq!(json, "\"multicast\"");
    }
}
