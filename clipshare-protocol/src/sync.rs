//! Clipboard synchronization between approved devices
//!
//! Glue between the system clipboard, the history log and the transport:
//! local copies are pushed to every approved device, received pushes are
//! written to the local clipboard once.

use crate::device::{current_timestamp_millis, ApprovedDevice};
use crate::history::{ClipboardHistory, HistoryEntry};
use crate::identity::DeviceIdentity;
use crate::message::{ClipboardMessage, MessageDeduplicator};
use crate::registry::DeviceRegistry;
use crate::settings::ClipboardProvider;
use crate::transport::ClipboardClient;
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Outcome of one push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub device_id: String,
    pub device_name: String,
    pub success: bool,
    pub error: Option<String>,
}

pub struct ClipboardSync {
    identity: DeviceIdentity,
    client: ClipboardClient,
    registry: Arc<DeviceRegistry>,
    clipboard: Arc<dyn ClipboardProvider>,
    history: Arc<ClipboardHistory>,
    dedup: Mutex<MessageDeduplicator>,
    /// Last text sent or received, used to avoid echoing a push back
    last_synced: Mutex<Option<String>>,
}

impl ClipboardSync {
    pub fn new(
        identity: DeviceIdentity,
        client: ClipboardClient,
        registry: Arc<DeviceRegistry>,
        clipboard: Arc<dyn ClipboardProvider>,
        history: Arc<ClipboardHistory>,
    ) -> Self {
        Self {
            identity,
            client,
            registry,
            clipboard,
            history,
            dedup: Mutex::new(MessageDeduplicator::new()),
            last_synced: Mutex::new(None),
        }
    }

    pub fn history(&self) -> &Arc<ClipboardHistory> {
        &self.history
    }

    /// Push `text` to every approved device concurrently
    pub async fn send_to_all_devices(&self, text: &str) -> Vec<SendResult> {
        let devices = self.registry.snapshot();
        if devices.is_empty() {
            debug!("No approved devices to send to");
            return Vec::new();
        }

        self.remember(text);
        let message = ClipboardMessage::new(text, &self.identity.device_id, &self.identity.name);
        let sends = devices
            .iter()
            .map(|device| self.push(device, &message));
        let results: Vec<SendResult> = join_all(sends).await;

        let delivered = results.iter().filter(|r| r.success).count();
        info!(
            "Sent clipboard to {}/{} device(s)",
            delivered,
            results.len()
        );
        if delivered > 0 {
            self.record_local(text);
        }
        results
    }

    /// Push `text` to a single device
    pub async fn send_to_device(&self, device: &ApprovedDevice, text: &str) -> bool {
        self.remember(text);
        let message = ClipboardMessage::new(text, &self.identity.device_id, &self.identity.name);
        let result = self.push(device, &message).await;
        if result.success {
            self.record_local(text);
        }
        result.success
    }

    async fn push(&self, device: &ApprovedDevice, message: &ClipboardMessage) -> SendResult {
        let success = self
            .client
            .send_clipboard(&device.ip_address, device.port, message)
            .await;
        if success {
            self.registry
                .update_last_seen(&device.device_id, current_timestamp_millis());
        }

        SendResult {
            device_id: device.device_id.clone(),
            device_name: device.name.clone(),
            success,
            error: (!success).then(|| format!("{} did not accept the push", device.address())),
        }
    }

    /// Apply a received push
    ///
    /// Writes the text to the system clipboard and history unless the same
    /// message was already handled. Returns whether it was new.
    pub fn handle_received_message(&self, message: &ClipboardMessage) -> bool {
        let is_new = self
            .dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message);
        if !is_new {
            debug!(
                "Skipping duplicate message from {} at {}",
                message.device_id, message.timestamp
            );
            return false;
        }

        if !self.registry.contains(&message.device_id) {
            debug!("Message from unpaired device {}", message.device_id);
        }

        self.remember(&message.text);
        self.clipboard.set_text(&message.text);
        self.history.push(HistoryEntry::new(
            &message.text,
            &message.device_id,
            &message.device_name,
        ));
        info!(
            "Applied clipboard from {} ({} chars)",
            message.device_name,
            message.text.len()
        );
        true
    }

    /// Record the current system clipboard in history
    pub fn copy_from_system(&self) -> Option<HistoryEntry> {
        let text = self.clipboard.get_text();
        if text.trim().is_empty() {
            return None;
        }

        let entry = HistoryEntry::new(text, &self.identity.device_id, &self.identity.name);
        self.history.push(entry.clone()).then_some(entry)
    }

    /// Push the system clipboard if it changed since the last sync
    ///
    /// Returns `None` when there was nothing new to send.
    pub async fn sync_local_change(&self) -> Option<Vec<SendResult>> {
        let text = self.clipboard.get_text();
        if text.trim().is_empty() || self.is_last_synced(&text) {
            return None;
        }

        if self.registry.device_count() == 0 {
            self.remember(&text);
            return None;
        }
        Some(self.send_to_all_devices(&text).await)
    }

    /// Forget every processed message key
    pub fn clear_processed(&self) {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record_local(&self, text: &str) {
        if !self.history.push(HistoryEntry::new(
            text,
            &self.identity.device_id,
            &self.identity.name,
        )) {
            debug!("History disabled or text blank, not recorded");
        }
    }

    fn remember(&self, text: &str) {
        *self
            .last_synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(text.to_string());
    }

    fn is_last_synced(&self, text: &str) -> bool {
        self.last_synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(text)
    }
}

impl std::fmt::Debug for ClipboardSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardSync")
            .field("device_id", &self.identity.device_id)
            .finish_non_exhaustive()
    }
}
