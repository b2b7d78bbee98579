//! Error handling for the clipshare protocol
//!
//! All fallible library operations return [`Result`], whose error type is
//! [`ProtocolError`]. Conversions from the underlying libraries are derived
//! with `thiserror`, so `?` works across I/O, JSON, HTTP and mDNS calls.
//!
//! ## Error Categories
//!
//! ### Transient network failures
//! `Timeout`, `ConnectionRefused`, `NetworkError`, `Unreachable`, `Http`.
//! These are recoverable: the outbound client folds them into `false`/`None`
//! and the approval calls retry them on a fixed schedule.
//!
//! ### Startup failures
//! `PortsExhausted` is returned when every candidate server port is taken.
//! Any other bind error surfaces as `Io`.
//!
//! ### Validation failures
//! `InvalidAddress`, `InvalidPort`, `DeviceExists`.
//! These describe bad input and are reported back to the caller unchanged.
//!
//! ### Pairing failures
//! `DeviceNotFound`, `PortUnknown`.
//!
//! ```rust
//! use clipshare_protocol::{ProtocolError, Result};
//!
//! fn parse_port(raw: u32) -> Result<u16> {
//!     u16::try_from(raw)
//!         .ok()
//!         .filter(|port| *port != 0)
//!         .ok_or(ProtocolError::InvalidPort(raw))
//! }
//!
//! assert!(parse_port(8080).is_ok());
//! assert!(parse_port(70000).is_err());
//! ```

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (file system, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// mDNS daemon failure
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Invalid port: {0} (expected 1-65535)")]
    InvalidPort(u32),

    #[error("Device already exists: {0}")]
    DeviceExists(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device not reachable at {0}")]
    Unreachable(String),

    /// No free port in the server's fallback range
    #[error("No free port in range {first}-{last}")]
    PortsExhausted { first: u16, last: u16 },

    /// The listening port of a peer could not be resolved from discovery
    #[error("Listening port unknown for device: {0}")]
    PortUnknown(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    Timeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ProtocolError {
    /// Map an I/O error to the matching network variant
    ///
    /// `context` is prefixed to the message so log lines show which
    /// operation failed.
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused => {
                ProtocolError::ConnectionRefused(format!("{}: {}", context, error))
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                ProtocolError::NetworkError(format!(
                    "{}: connection interrupted ({})",
                    context, error
                ))
            }
            _ => ProtocolError::Io(error),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout(_)
                | ProtocolError::NetworkError(_)
                | ProtocolError::ConnectionRefused(_)
                | ProtocolError::Unreachable(_)
                | ProtocolError::Http(_)
                | ProtocolError::Io(_)
                | ProtocolError::Mdns(_)
                | ProtocolError::Discovery(_)
        )
    }

    /// Whether the user has to change something before retrying
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidAddress(_)
                | ProtocolError::InvalidPort(_)
                | ProtocolError::DeviceExists(_)
                | ProtocolError::PortsExhausted { .. }
                | ProtocolError::PortUnknown(_)
        )
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            ProtocolError::InvalidAddress(_) => "Invalid IP address format".to_string(),
            ProtocolError::InvalidPort(_) => "Port must be between 1 and 65535".to_string(),
            ProtocolError::DeviceExists(name) => format!("Device already exists: {}", name),
            ProtocolError::DeviceNotFound(id) => {
                format!("Device '{}' is not paired with this computer.", id)
            }
            ProtocolError::Unreachable(addr) => format!("Device not reachable at {}", addr),
            ProtocolError::PortsExhausted { first, last } => format!(
                "Could not start the clipboard server: ports {}-{} are all in use.",
                first, last
            ),
            ProtocolError::PortUnknown(id) => format!(
                "Device '{}' has not been discovered yet. Rescan and try again.",
                id
            ),
            ProtocolError::Timeout(msg) => {
                format!("Connection timeout: {}. Check network connection.", msg)
            }
            ProtocolError::ConnectionRefused(_) => {
                "Connection refused. Check if clipshare is running on the device.".to_string()
            }
            ProtocolError::NetworkError(msg) => {
                format!("Network error: {}. Connection may be unstable.", msg)
            }
            ProtocolError::Discovery(msg) => format!("Device discovery unavailable: {}.", msg),
            ProtocolError::Mdns(e) => format!("Device discovery unavailable: {}.", e),
            other => other.to_string(),
        }
    }
}
