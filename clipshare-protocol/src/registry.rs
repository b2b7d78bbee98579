//! Approved Device Registry
//!
//! Durable set of paired peers. At most one entry exists per device id;
//! inserting an entry with a known id replaces the old one.
//!
//! The set is published as copy-on-write snapshots (see
//! [`SnapshotCell`](crate::snapshot::SnapshotCell)) so the heartbeat loop,
//! request handlers and UI readers can share it without a global lock.
//! When a registry path is configured every mutation is written back to
//! disk as JSON; a failed write is logged and the in-memory state wins.

use crate::device::ApprovedDevice;
use crate::snapshot::{Snapshot, SnapshotCell};
use crate::Result;
use std::fs;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Registry of approved devices
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: SnapshotCell<ApprovedDevice>,
    registry_path: Option<PathBuf>,
}

impl DeviceRegistry {
    /// Create a registry backed by a JSON file, loading existing entries
    pub fn new(registry_path: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self {
            devices: SnapshotCell::new(),
            registry_path: Some(registry_path.into()),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Create a registry that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            devices: SnapshotCell::new(),
            registry_path: None,
        }
    }

    pub fn snapshot(&self) -> Snapshot<ApprovedDevice> {
        self.devices.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<ApprovedDevice>> {
        self.devices.subscribe()
    }

    pub fn get(&self, device_id: &str) -> Option<ApprovedDevice> {
        self.devices
            .snapshot()
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.get(device_id).is_some()
    }

    /// Find an entry registered at `ip:port`
    pub fn find_by_address(&self, ip_address: &str, port: u16) -> Option<ApprovedDevice> {
        self.devices
            .snapshot()
            .iter()
            .find(|d| d.ip_address == ip_address && d.port == port)
            .cloned()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Insert or replace the entry with the same device id
    pub fn upsert(&self, device: ApprovedDevice) {
        let device_id = device.device_id.clone();
        let replaced = self.devices.update(|devices| {
            match devices.iter_mut().find(|d| d.device_id == device.device_id) {
                Some(existing) => {
                    *existing = device;
                    true
                }
                None => {
                    devices.push(device);
                    false
                }
            }
        });

        if replaced {
            debug!("Replaced approved device {}", device_id);
        } else {
            info!("Added approved device {}", device_id);
        }
        self.persist();
    }

    /// Refresh the last-seen timestamp. Returns false for unknown ids.
    pub fn update_last_seen(&self, device_id: &str, timestamp: i64) -> bool {
        let updated = self.devices.update(|devices| {
            match devices.iter_mut().find(|d| d.device_id == device_id) {
                Some(device) => {
                    device.last_seen = timestamp;
                    true
                }
                None => false,
            }
        });

        if updated {
            self.persist();
        }
        updated
    }

    pub fn remove(&self, device_id: &str) -> Option<ApprovedDevice> {
        let removed = self.devices.update(|devices| {
            let index = devices.iter().position(|d| d.device_id == device_id)?;
            Some(devices.remove(index))
        });

        if let Some(device) = &removed {
            info!("Removed approved device {} ({})", device.name, device.device_id);
            self.persist();
        }
        removed
    }

    /// Drop every entry whose last-seen time is older than `max_age_millis`
    ///
    /// Returns the removed entries.
    pub fn prune_stale(&self, now: i64, max_age_millis: i64) -> Vec<ApprovedDevice> {
        self.remove_where(|d| d.is_stale(now, max_age_millis))
    }

    /// Drop the entries whose ids are listed
    pub fn remove_many(&self, device_ids: &[String]) -> Vec<ApprovedDevice> {
        self.remove_where(|d| device_ids.contains(&d.device_id))
    }

    fn remove_where(&self, predicate: impl Fn(&ApprovedDevice) -> bool) -> Vec<ApprovedDevice> {
        let removed = self.devices.update(|devices| {
            let (gone, kept): (Vec<_>, Vec<_>) = devices.drain(..).partition(|d| predicate(d));
            *devices = kept;
            gone
        });

        if !removed.is_empty() {
            for device in &removed {
                debug!("Removing device: {} ({})", device.name, device.device_id);
            }
            self.persist();
        }
        removed
    }

    /// Save the registry to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.registry_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self.devices.snapshot().as_ref())?;
        fs::write(path, json)?;
        debug!("Saved device registry to {:?}", path);
        Ok(())
    }

    /// Load the registry from disk, replacing the in-memory set
    pub fn load(&self) -> Result<()> {
        let Some(path) = &self.registry_path else {
            return Ok(());
        };

        if !path.exists() {
            debug!("No existing registry file at {:?}", path);
            return Ok(());
        }

        let json = fs::read_to_string(path)?;
        let mut devices: Vec<ApprovedDevice> = serde_json::from_str(&json)?;

        // Older files may carry duplicate ids; keep the last one written.
        let mut seen = std::collections::HashSet::new();
        devices.reverse();
        devices.retain(|d| seen.insert(d.device_id.clone()));
        devices.reverse();

        info!("Loaded {} approved devices from registry", devices.len());
        self.devices.replace(devices);
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to save device registry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device(id: &str, ip: &str, port: u16) -> ApprovedDevice {
        ApprovedDevice::new(id, format!("Device {}", id), ip, port)
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let registry = DeviceRegistry::in_memory();
        registry.upsert(device("device_1", "10.0.0.2", 8080));
        registry.upsert(device("device_1", "10.0.0.3", 8081));

        assert_eq!(registry.device_count(), 1);
        let stored = registry.get("device_1").unwrap();
        assert_eq!(stored.ip_address, "10.0.0.3");
        assert_eq!(stored.port, 8081);
    }

    #[test]
    fn test_find_by_address() {
        let registry = DeviceRegistry::in_memory();
        registry.upsert(device("device_1", "10.0.0.2", 8080));

        assert!(registry.find_by_address("10.0.0.2", 8080).is_some());
        assert!(registry.find_by_address("10.0.0.2", 8081).is_none());
    }

    #[test]
    fn test_prune_stale() {
        let registry = DeviceRegistry::in_memory();
        let now = crate::current_timestamp_millis();

        let mut old = device("device_old", "10.0.0.2", 8080);
        old.last_seen = now - 200_000;
        let mut fresh = device("device_fresh", "10.0.0.3", 8080);
        fresh.last_seen = now - 10_000;
        registry.upsert(old);
        registry.upsert(fresh);

        let pruned = registry.prune_stale(now, 180_000);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].device_id, "device_old");
        assert!(registry.contains("device_fresh"));
    }

    #[test]
    fn test_update_last_seen_unknown() {
        let registry = DeviceRegistry::in_memory();
        assert!(!registry.update_last_seen("device_x", 5));
    }

    #[test]
    fn test_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("approved_devices.json");

        {
            let registry = DeviceRegistry::new(&path).unwrap();
            registry.upsert(device("device_1", "10.0.0.2", 8080));
            registry.upsert(device("device_2", "10.0.0.3", 8081));
            registry.remove("device_1");
        }

        let reloaded = DeviceRegistry::new(&path).unwrap();
        assert_eq!(reloaded.device_count(), 1);
        assert!(reloaded.contains("device_2"));
    }

    #[test]
    fn test_load_collapses_duplicate_ids() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("approved_devices.json");
        let devices = vec![
            device("device_1", "10.0.0.2", 8080),
            device("device_1", "10.0.0.9", 9090),
        ];
        fs::write(&path, serde_json::to_string(&devices).unwrap()).unwrap();

        let registry = DeviceRegistry::new(&path).unwrap();
        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.get("device_1").unwrap().port, 9090);
    }
}
