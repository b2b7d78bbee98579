//! Device Discovery
//!
//! Advertises this device on the LAN and observes peers advertising the
//! same service type. Concrete adapters ([`MdnsDiscovery`],
//! [`MulticastDiscovery`]) only translate their native announcements into
//! [`ServiceAdvertisement`] values; everything else lives once in
//! [`DiscoveryState`]:
//!
//! - parsing `"<name> (device_<id>)"` instance names
//! - dropping our own advertisements (self-filtering)
//! - collapsing re-announcements by `deviceId:ip:port`
//! - removing every entry of a lost device
//!
//! ## Service metadata
//!
//! | Field | Value |
//! |-------|-------|
//! | service type | `_clipboard._tcp.local.` |
//! | instance name | `"<deviceName> (<deviceId>)"` |
//! | TXT `deviceId` | device id |
//! | TXT `deviceName` | human-readable name |
//! | TXT `port` | HTTP server port, preferred over the transport port |
//!
//! Discovery failures are never fatal: a provider that fails to start
//! leaves this device undiscoverable and the caller logs the error.

pub mod events;
mod mdns;
mod multicast;

pub use events::DiscoveryEvent;
pub use mdns::MdnsDiscovery;
pub use multicast::{MulticastConfig, MulticastDiscovery, MULTICAST_GROUP, MULTICAST_PORT};

use crate::device::{current_timestamp_millis, DiscoveredDevice};
use crate::identity::DeviceIdentity;
use crate::snapshot::{Snapshot, SnapshotCell};
use crate::{ProtocolError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// DNS-SD service type shared by every clipshare peer
pub const SERVICE_TYPE: &str = "_clipboard._tcp.local.";

/// TXT record key carrying the device id
pub const TXT_DEVICE_ID: &str = "deviceId";
/// TXT record key carrying the device name
pub const TXT_DEVICE_NAME: &str = "deviceName";
/// TXT record key carrying the HTTP server port
pub const TXT_PORT: &str = "port";

/// Pause between stop and start during a rescan
pub const RESCAN_DELAY: Duration = Duration::from_millis(100);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A peer announcement as reported by an adapter
#[derive(Debug, Clone, Default)]
pub struct ServiceAdvertisement {
    /// Instance name, e.g. `"Laptop (device_1700000000000)"`
    pub instance_name: String,
    /// Resolved addresses of the announcing host
    pub addresses: Vec<IpAddr>,
    /// Port reported by the transport
    pub port: u16,
    /// TXT metadata
    pub properties: HashMap<String, String>,
}

/// A LAN service-discovery backend
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Begin advertising `identity` on `port` and browsing for peers
    ///
    /// Idempotent while running, and callable again after [`stop`].
    ///
    /// [`stop`]: DiscoveryProvider::stop
    async fn start(&self, identity: &DeviceIdentity, port: u16) -> Result<()>;

    /// Withdraw the advertisement, stop browsing and forget every peer
    ///
    /// Returns immediately; safe to call from any task and when not running.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Shared discovery state behind this provider
    fn state(&self) -> &DiscoveryState;

    /// Watch channel carrying the current discovered-device set
    fn discovered_devices(&self) -> watch::Receiver<Snapshot<DiscoveredDevice>> {
        self.state().subscribe()
    }

    fn snapshot(&self) -> Snapshot<DiscoveredDevice> {
        self.state().snapshot()
    }

    /// First discovered entry for `device_id`
    fn find(&self, device_id: &str) -> Option<DiscoveredDevice> {
        self.state().find(device_id)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.state().subscribe_events()
    }
}

/// Stop discovery, wait briefly, and start again
///
/// Starting from a clean slate makes every peer re-announce.
pub async fn rescan(
    provider: &dyn DiscoveryProvider,
    identity: &DeviceIdentity,
    port: u16,
) -> Result<()> {
    info!("Rescanning for devices");
    provider.stop();
    tokio::time::sleep(RESCAN_DELAY).await;
    provider.start(identity, port).await
}

/// Split an instance name into `(name, device_id)`
///
/// Malformed names fall back to the raw string for both parts.
pub fn parse_instance_name(instance_name: &str) -> (String, String) {
    let name = name_pattern()
        .captures(instance_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| instance_name.to_string());

    let device_id = id_pattern()
        .find(instance_name)
        .map(|m| {
            m.as_str()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .to_string()
        })
        .unwrap_or_else(|| instance_name.to_string());

    (name, device_id)
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+?)\s+\(device_.+\)$").expect("valid name pattern"))
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\(device_.+\)").expect("valid id pattern"))
}

/// Platform-independent discovery bookkeeping
#[derive(Debug)]
pub struct DiscoveryState {
    local_device_id: RwLock<String>,
    devices: SnapshotCell<DiscoveredDevice>,
    keys: Mutex<HashSet<String>>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local_device_id: RwLock::new(String::new()),
            devices: SnapshotCell::new(),
            keys: Mutex::new(HashSet::new()),
            event_tx,
        }
    }

    /// Set the id whose advertisements must be ignored
    pub fn set_local_device_id(&self, device_id: impl Into<String>) {
        *self
            .local_device_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = device_id.into();
    }

    pub fn local_device_id(&self) -> String {
        self.local_device_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> Snapshot<DiscoveredDevice> {
        self.devices.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<DiscoveredDevice>> {
        self.devices.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn find(&self, device_id: &str) -> Option<DiscoveredDevice> {
        self.devices
            .snapshot()
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Whether an advertisement names this device
    pub fn is_self(&self, instance_name: &str, device_id: &str) -> bool {
        let local = self.local_device_id();
        !local.is_empty() && (device_id == local || instance_name.contains(&local))
    }

    /// Record a peer advertisement
    ///
    /// Returns the new entry, or `None` when the advertisement was ours,
    /// carried no address, or was already known under the same
    /// `deviceId:ip:port` key.
    pub fn handle_advertisement(&self, ad: ServiceAdvertisement) -> Option<DiscoveredDevice> {
        let (parsed_name, parsed_id) = parse_instance_name(&ad.instance_name);
        let device_id = ad
            .properties
            .get(TXT_DEVICE_ID)
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or(parsed_id);
        let name = ad
            .properties
            .get(TXT_DEVICE_NAME)
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or(parsed_name);

        if self.is_self(&ad.instance_name, &device_id) {
            debug!("Ignoring our own advertisement: {}", ad.instance_name);
            return None;
        }

        let Some(ip) = preferred_address(&ad.addresses) else {
            debug!("Advertisement without address: {}", ad.instance_name);
            return None;
        };

        let port = ad
            .properties
            .get(TXT_PORT)
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(ad.port);

        let device = DiscoveredDevice {
            device_id,
            name,
            ip_address: ip.to_string(),
            port,
            last_seen: current_timestamp_millis(),
        };

        {
            let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
            if !keys.insert(device.dedup_key()) {
                debug!(
                    "Device already known: {} ({}) at {}:{}",
                    device.name, device.device_id, device.ip_address, device.port
                );
                return None;
            }
            self.devices.update(|devices| devices.push(device.clone()));
        }

        info!(
            "Discovered device: {} ({}) at {}:{}",
            device.name, device.device_id, device.ip_address, device.port
        );
        let _ = self.event_tx.send(DiscoveryEvent::DeviceAdded {
            device: device.clone(),
        });
        Some(device)
    }

    /// Handle a lost-service notice carrying an instance name
    pub fn handle_removal(&self, instance_name: &str) -> usize {
        let (_, device_id) = parse_instance_name(instance_name);
        self.remove_device(&device_id)
    }

    /// Drop every entry and dedup key for `device_id`
    pub fn remove_device(&self, device_id: &str) -> usize {
        let removed = {
            let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
            let prefix = format!("{}:", device_id);
            keys.retain(|key| !key.starts_with(&prefix));
            self.devices.update(|devices| {
                let before = devices.len();
                devices.retain(|d| d.device_id != device_id);
                before - devices.len()
            })
        };

        if removed > 0 {
            info!("Device lost: {} ({} entries removed)", device_id, removed);
            let _ = self.event_tx.send(DiscoveryEvent::DeviceRemoved {
                device_id: device_id.to_string(),
            });
        }
        removed
    }

    /// Forget all peers
    pub fn clear(&self) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.clear();
        self.devices.clear();
    }

    /// Log and broadcast an adapter failure, returning it as an error
    pub fn report_error(&self, message: impl Into<String>) -> ProtocolError {
        let message = message.into();
        warn!("Discovery error: {}", message);
        self.emit(DiscoveryEvent::Error {
            message: message.clone(),
        });
        ProtocolError::Discovery(message)
    }

    pub(crate) fn emit(&self, event: DiscoveryEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self::new()
    }
}

/// First IPv4 address, else the first address of any family
fn preferred_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
}
