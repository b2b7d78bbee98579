//! Pairing Event System
//!
//! Events emitted by [`PairingService`](super::PairingService) as devices
//! move through the handshake.

use crate::device::ApprovedDevice;
use crate::transport::ApprovalRequest;

/// Events emitted by the pairing service
#[derive(Debug, Clone)]
pub enum PairingEvent {
    /// Our pairing request reached the peer
    RequestSent {
        device_id: String,
        device_name: String,
    },

    /// Every attempt to deliver our pairing request failed
    RequestFailed {
        device_id: String,
        reason: String,
    },

    /// A peer asked to pair and waits for a decision
    RequestReceived {
        request: ApprovalRequest,
    },

    /// A device was added to the registry through the handshake
    DeviceApproved {
        device: ApprovedDevice,
    },

    /// We rejected a pending request
    RequestRejected {
        device_id: String,
    },

    /// A device left the registry by unpairing
    DeviceUnpaired {
        device_id: String,
        /// True when the peer initiated the unpair
        by_peer: bool,
    },

    /// The heartbeat dropped a device that was not seen for too long
    DevicePruned {
        device_id: String,
    },

    ManualDeviceAdded {
        device: ApprovedDevice,
    },
}

impl PairingEvent {
    pub fn is_request_received(&self) -> bool {
        matches!(self, PairingEvent::RequestReceived { .. })
    }

    pub fn is_device_approved(&self) -> bool {
        matches!(self, PairingEvent::DeviceApproved { .. })
    }

    /// Device the event refers to
    pub fn device_id(&self) -> &str {
        match self {
            PairingEvent::RequestSent { device_id, .. }
            | PairingEvent::RequestFailed { device_id, .. }
            | PairingEvent::RequestRejected { device_id }
            | PairingEvent::DeviceUnpaired { device_id, .. }
            | PairingEvent::DevicePruned { device_id } => device_id,
            PairingEvent::RequestReceived { request } => &request.device_id,
            PairingEvent::DeviceApproved { device } | PairingEvent::ManualDeviceAdded { device } => {
                &device.device_id
            }
        }
    }
}
