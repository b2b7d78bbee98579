//! HTTP Transport
//!
//! Every peer runs a [`ClipboardServer`] and talks to other peers through a
//! [`ClipboardClient`]. All bodies are UTF-8 JSON.
//!
//! | Route | Method | Request | Response `status` |
//! |-------|--------|---------|-------------------|
//! | `/discover` | GET | - | `{deviceId, name}` |
//! | `/ping` | GET | - | `ok` |
//! | `/clipboard` | POST | [`ClipboardMessage`](crate::ClipboardMessage) | `received` |
//! | `/approve` | POST | [`ApproveBody`] | `ignored`, `duplicate`, `requested` |
//! | `/approve-device` | POST | [`ApproveBody`] | `ignored`, `approved` |
//! | `/unpair-device` | POST | [`UnpairBody`] | `unpaired` |

pub mod client;
pub mod inbox;
pub mod retry;
pub mod server;

pub use client::{ClientConfig, ClipboardClient};
pub use inbox::{ApprovalRequest, DeviceApproval, ServerInbox, UnpairNotification};
pub use retry::RetrySchedule;
pub use server::{build_router, AppState, ClipboardServer, ServerConfig};

use serde::{Deserialize, Serialize};

pub const ROUTE_DISCOVER: &str = "/discover";
pub const ROUTE_PING: &str = "/ping";
pub const ROUTE_CLIPBOARD: &str = "/clipboard";
pub const ROUTE_APPROVE: &str = "/approve";
pub const ROUTE_APPROVE_DEVICE: &str = "/approve-device";
pub const ROUTE_UNPAIR_DEVICE: &str = "/unpair-device";

pub const STATUS_OK: &str = "ok";
pub const STATUS_RECEIVED: &str = "received";
pub const STATUS_IGNORED: &str = "ignored";
pub const STATUS_DUPLICATE: &str = "duplicate";
pub const STATUS_REQUESTED: &str = "requested";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_UNPAIRED: &str = "unpaired";

/// `GET /discover` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverResponse {
    pub device_id: String,
    pub name: String,
}

/// `GET /ping` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: String,
    pub device_id: String,
    #[serde(alias = "name")]
    pub device_name: String,
    pub port: u16,
}

/// Body-less acknowledgement returned by the POST routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Body of `/approve` and `/approve-device`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    pub device_id: String,
    pub device_name: String,
}

/// Body of `/unpair-device`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpairBody {
    pub device_id: String,
}
