//! Clipshare Protocol Implementation
//!
//! Peer-to-peer clipboard sharing on a local network: devices find each
//! other over mDNS or UDP multicast, pair through a symmetric HTTP
//! handshake, and push clipboard text to approved peers.

pub mod context;
pub mod device;
pub mod discovery;
pub mod history;
pub mod identity;
pub mod message;
pub mod pairing;
pub mod registry;
pub mod settings;
pub mod snapshot;
pub mod sync;
pub mod transport;

mod error;
pub use context::{AppContext, AppContextCell, ContextOptions};
pub use device::{current_timestamp_millis, ApprovedDevice, DiscoveredDevice};
pub use discovery::{DiscoveryEvent, DiscoveryProvider, MdnsDiscovery, MulticastDiscovery};
pub use error::{ProtocolError, Result};
pub use history::{ClipboardHistory, HistoryConfig, HistoryEntry};
pub use identity::DeviceIdentity;
pub use message::{ClipboardMessage, MessageDeduplicator};
pub use pairing::{PairingConfig, PairingEvent, PairingService};
pub use registry::DeviceRegistry;
pub use settings::{ClipboardProvider, DiscoveryMethod, MemoryClipboard, Settings, SettingsStore};
pub use sync::{ClipboardSync, SendResult};
pub use transport::{ClientConfig, ClipboardClient, ClipboardServer, ServerConfig, ServerInbox};
