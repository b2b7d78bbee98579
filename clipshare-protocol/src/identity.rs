//! Local device identity

use crate::device::current_timestamp_millis;
use serde::{Deserialize, Serialize};

/// Prefix of every generated device id
pub const DEVICE_ID_PREFIX: &str = "device_";

/// Identity of this process on the network
///
/// Generated once at startup and never changed afterwards. The id is
/// `device_<epoch millis>`, which is collision-tolerant but not unique in
/// any cryptographic sense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    pub name: String,
}

impl DeviceIdentity {
    /// Generate a fresh identity for this process
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            device_id: format!("{}{}", DEVICE_ID_PREFIX, current_timestamp_millis()),
            name: name.into(),
        }
    }

    /// Use a fixed, configured device id
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
        }
    }

    /// Service instance name advertised on the LAN: `"<name> (<id>)"`
    pub fn instance_name(&self) -> String {
        format!("{} ({})", self.name, self.device_id)
    }
}
