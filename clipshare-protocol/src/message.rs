//! Clipboard messages pushed between peers

use crate::device::current_timestamp_millis;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// Upper bound on remembered message keys
const MAX_TRACKED_KEYS: usize = 1024;

/// Body of `POST /clipboard`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardMessage {
    pub text: String,
    pub device_id: String,
    pub device_name: String,
    /// Epoch millis at the sender
    pub timestamp: i64,
}

impl ClipboardMessage {
    /// Build a message stamped with the current time
    pub fn new(
        text: impl Into<String>,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            device_id: device_id.into(),
            device_name: device_name.into(),
            timestamp: current_timestamp_millis(),
        }
    }

    /// `deviceId_deviceName_hash(text)_timestamp`
    ///
    /// Identifies retransmissions of the same push.
    pub fn dedup_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.text.hash(&mut hasher);
        format!(
            "{}_{}_{:x}_{}",
            self.device_id,
            self.device_name,
            hasher.finish(),
            self.timestamp
        )
    }
}

/// Remembers which messages were already processed
#[derive(Debug, Default)]
pub struct MessageDeduplicator {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl MessageDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message`; returns false if it was seen before
    pub fn insert(&mut self, message: &ClipboardMessage) -> bool {
        let key = message.dedup_key();
        if !self.seen.insert(key.clone()) {
            return false;
        }

        self.order.push_back(key);
        while self.order.len() > MAX_TRACKED_KEYS {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str, timestamp: i64) -> ClipboardMessage {
        ClipboardMessage {
            text: text.to_string(),
            device_id: "device_1".to_string(),
            device_name: "Laptop".to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(message("hello", 17)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "hello",
                "deviceId": "device_1",
                "deviceName": "Laptop",
                "timestamp": 17
            })
        );
    }

    #[test]
    fn test_retransmission_is_duplicate() {
        let mut dedup = MessageDeduplicator::new();
        assert!(dedup.insert(&message("hello", 1)));
        assert!(!dedup.insert(&message("hello", 1)));
        // Same text pushed again later is a new message
        assert!(dedup.insert(&message("hello", 2)));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_tracking_is_bounded() {
        let mut dedup = MessageDeduplicator::new();
        for ts in 0..(MAX_TRACKED_KEYS as i64 + 10) {
            dedup.insert(&message("x", ts));
        }
        assert_eq!(dedup.len(), MAX_TRACKED_KEYS);
        // The oldest keys were forgotten
        assert!(dedup.insert(&message("x", 0)));
    }
}
