//! Device records
//!
//! Two kinds of peers exist:
//! - [`DiscoveredDevice`]: seen on the LAN during the current discovery
//!   session. Ephemeral, never persisted.
//! - [`ApprovedDevice`]: completed the pairing handshake. Owned by the
//!   [`DeviceRegistry`](crate::DeviceRegistry) and persisted.

use serde::{Deserialize, Serialize};

/// A peer observed by a discovery provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub device_id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    /// Epoch millis of the announcement that produced this entry
    pub last_seen: i64,
}

impl DiscoveredDevice {
    /// Composite key used to collapse IPv4/IPv6 re-announcements
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.device_id, &self.ip_address, self.port)
    }
}

/// Build a `deviceId:ip:port` dedup key
pub fn dedup_key(device_id: &str, ip_address: &str, port: u16) -> String {
    format!("{}:{}:{}", device_id, ip_address, port)
}

/// A peer that completed the pairing handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedDevice {
    pub device_id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    /// Epoch millis of the last successful contact
    pub last_seen: i64,
}

impl ApprovedDevice {
    pub fn new(
        device_id: impl Into<String>,
        name: impl Into<String>,
        ip_address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            ip_address: ip_address.into(),
            port,
            last_seen: current_timestamp_millis(),
        }
    }

    /// `ip:port` string for log lines and error messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    /// Milliseconds since this device was last seen, relative to `now`
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_seen)
    }

    pub fn is_stale(&self, now: i64, max_age_millis: i64) -> bool {
        self.age_millis(now) > max_age_millis
    }
}

/// Current UNIX timestamp in milliseconds
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key() {
        let device = DiscoveredDevice {
            device_id: "device_1".to_string(),
            name: "Laptop".to_string(),
            ip_address: "192.168.1.20".to_string(),
            port: 8081,
            last_seen: 0,
        };
        assert_eq!(device.dedup_key(), "device_1:192.168.1.20:8081");
    }

    #[test]
    fn test_staleness() {
        let mut device = ApprovedDevice::new("device_1", "Laptop", "10.0.0.2", 8080);
        let now = device.last_seen;
        assert!(!device.is_stale(now, 180_000));

        device.last_seen = now - 181_000;
        assert!(device.is_stale(now, 180_000));
        assert_eq!(device.age_millis(now), 181_000);
    }

    #[test]
    fn test_wire_field_names() {
        let device = ApprovedDevice::new("device_1", "Laptop", "10.0.0.2", 8080);
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["deviceId"], "device_1");
        assert_eq!(json["ipAddress"], "10.0.0.2");
        assert!(json.get("lastSeen").is_some());
    }
}
