//! Device Pairing
//!
//! Pairing is symmetric: a device only ever adds a peer to its registry
//! after the *peer* confirmed.
//!
//! ## Handshake
//!
//! 1. **Discovery**: A sees B through a discovery provider
//! 2. **Request**: A calls `POST /approve` on B ([`PairingService::approve_discovered_device`])
//! 3. **Decision**: B's user accepts ([`PairingService::approve_device`]) or
//!    rejects ([`PairingService::reject_approval_request`])
//! 4. **Confirmation**: on accept B stores A and calls `POST /approve-device` on A
//! 5. **Completion**: A stores B when it handles the notice
//!    ([`PairingService::handle_device_approval`])
//!
//! Unpairing removes the peer locally first and then tells the peer on a
//! best-effort basis. A heartbeat pings every approved device and drops
//! those not seen for longer than the staleness threshold.

pub mod events;
pub mod service;

pub use events::PairingEvent;
pub use service::{PairingConfig, PairingService};
