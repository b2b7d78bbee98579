//! Discovery Event System
//!
//! Events broadcast by [`DiscoveryState`](super::DiscoveryState) alongside
//! the discovered-device snapshots.

use crate::device::DiscoveredDevice;

/// Events emitted by a discovery provider
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A new `deviceId:ip:port` entry was recorded
    DeviceAdded {
        device: DiscoveredDevice,
    },

    /// Every entry of a device was dropped after a loss notice or timeout
    DeviceRemoved {
        device_id: String,
    },

    /// Advertising and browsing started
    ServiceStarted {
        /// HTTP port advertised to peers
        port: u16,
    },

    ServiceStopped,

    /// A non-fatal error inside an adapter
    Error {
        message: String,
    },
}

impl DiscoveryEvent {
    pub fn is_device_added(&self) -> bool {
        matches!(self, DiscoveryEvent::DeviceAdded { .. })
    }

    pub fn is_device_removed(&self) -> bool {
        matches!(self, DiscoveryEvent::DeviceRemoved { .. })
    }

    /// Device id for device-related events
    pub fn device_id(&self) -> Option<&str> {
        match self {
            DiscoveryEvent::DeviceAdded { device } => Some(&device.device_id),
            DiscoveryEvent::DeviceRemoved { device_id } => Some(device_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_accessor() {
        let event = DiscoveryEvent::DeviceRemoved {
            device_id: "device_2".to_string(),
        };
        assert_eq!(event.device_id(), Some("device_2"));
        assert!(event.is_device_removed());

        assert_eq!(DiscoveryEvent::ServiceStopped.device_id(), None);
        assert_eq!(DiscoveryEvent::ServiceStarted { port: 8080 }.device_id(), None);
    }
}
