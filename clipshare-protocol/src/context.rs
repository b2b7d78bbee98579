//! Application context
//!
//! One [`AppContext`] per process holds every shared component. It is built
//! once through [`AppContextCell`] and then handed to whoever needs it.

use crate::discovery::{self, DiscoveryProvider, MdnsDiscovery, MulticastDiscovery};
use crate::history::{ClipboardHistory, HistoryConfig};
use crate::identity::DeviceIdentity;
use crate::pairing::{PairingConfig, PairingService};
use crate::registry::DeviceRegistry;
use crate::settings::{ClipboardProvider, DiscoveryMethod};
use crate::sync::ClipboardSync;
use crate::transport::{ClientConfig, ClipboardClient, ClipboardServer, ServerConfig};
use crate::{ProtocolError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

/// Registry file name inside the data directory
pub const REGISTRY_FILE: &str = "approved_devices.json";

/// History file name inside the data directory
pub const HISTORY_FILE: &str = "history.json";

/// Everything needed to build an [`AppContext`]
#[derive(Clone)]
pub struct ContextOptions {
    pub identity: DeviceIdentity,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub pairing: PairingConfig,
    pub history: HistoryConfig,
    pub discovery_method: DiscoveryMethod,
    /// Where the registry and history are stored; `None` keeps them in memory
    pub data_dir: Option<PathBuf>,
    pub clipboard: Arc<dyn ClipboardProvider>,
}

/// Shared components of a running device
pub struct AppContext {
    pub identity: DeviceIdentity,
    pub registry: Arc<DeviceRegistry>,
    pub server: Arc<ClipboardServer>,
    pub client: ClipboardClient,
    pub discovery: Arc<dyn DiscoveryProvider>,
    pub pairing: Arc<PairingService>,
    pub history: Arc<ClipboardHistory>,
    pub sync: Arc<ClipboardSync>,
}

impl AppContext {
    pub fn build(options: ContextOptions) -> Result<Self> {
        let ContextOptions {
            identity,
            server,
            client,
            pairing,
            history,
            discovery_method,
            data_dir,
            clipboard,
        } = options;

        let (registry, history) = match &data_dir {
            Some(dir) => (
                DeviceRegistry::new(dir.join(REGISTRY_FILE))?,
                ClipboardHistory::with_path(history, dir.join(HISTORY_FILE))?,
            ),
            None => (DeviceRegistry::in_memory(), ClipboardHistory::new(history)),
        };
        let registry = Arc::new(registry);
        let history = Arc::new(history);

        let client = ClipboardClient::new(client)?;
        let server = Arc::new(ClipboardServer::new(identity.clone(), server));
        let discovery: Arc<dyn DiscoveryProvider> = match discovery_method {
            DiscoveryMethod::Mdns => Arc::new(MdnsDiscovery::new()),
            DiscoveryMethod::Multicast => Arc::new(MulticastDiscovery::with_defaults()),
        };

        let pairing = Arc::new(PairingService::new(
            identity.clone(),
            pairing,
            Arc::clone(&registry),
            client.clone(),
            server.inbox(),
            Arc::clone(&discovery),
        ));
        let sync = Arc::new(ClipboardSync::new(
            identity.clone(),
            client.clone(),
            Arc::clone(&registry),
            clipboard,
            Arc::clone(&history),
        ));

        info!(
            "Application context ready for {} ({:?} discovery)",
            identity.instance_name(),
            discovery_method
        );
        Ok(Self {
            identity,
            registry,
            server,
            client,
            discovery,
            pairing,
            history,
            sync,
        })
    }

    /// Start the server, then discovery on the bound port, then the heartbeat
    ///
    /// Only a server failure is an error; discovery failures leave the
    /// device undiscoverable and are logged.
    pub async fn start(&self) -> Result<u16> {
        let port = self.server.start().await?;

        if let Err(e) = self.discovery.start(&self.identity, port).await {
            error!("Discovery failed to start, device is not discoverable: {}", e);
        }

        self.pairing.start_heartbeat();
        Ok(port)
    }

    /// Stop discovery and start it again on the server's port
    pub async fn rescan(&self) -> Result<()> {
        let port = self.server.actual_port().ok_or_else(|| {
            ProtocolError::InvalidState("server is not running".to_string())
        })?;
        discovery::rescan(self.discovery.as_ref(), &self.identity, port).await
    }

    /// Stop every background component and flush state to disk
    pub async fn shutdown(&self) {
        self.pairing.stop_heartbeat();
        self.discovery.stop();
        self.server.stop().await;

        if let Err(e) = self.registry.save() {
            warn!("Failed to save device registry: {}", e);
        }
        if let Err(e) = self.history.save() {
            warn!("Failed to save clipboard history: {}", e);
        }
        info!("Application context shut down");
    }
}

/// Process-wide, initialize-once holder of the [`AppContext`]
#[derive(Default)]
pub struct AppContextCell {
    inner: OnceCell<Arc<AppContext>>,
}

impl AppContextCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context on first call; later calls return the same one
    /// and ignore `options`
    pub async fn get_or_init(&self, options: ContextOptions) -> Result<Arc<AppContext>> {
        self.inner
            .get_or_try_init(|| async move { AppContext::build(options).map(Arc::new) })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<AppContext>> {
        self.inner.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryClipboard;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn options(data_dir: Option<PathBuf>) -> ContextOptions {
        ContextOptions {
            identity: DeviceIdentity::new("device_1", "Desk"),
            server: ServerConfig {
                base_port: 0,
                bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                ..Default::default()
            },
            client: ClientConfig::default(),
            pairing: PairingConfig::default(),
            history: HistoryConfig::default(),
            discovery_method: DiscoveryMethod::Multicast,
            data_dir,
            clipboard: Arc::new(MemoryClipboard::new()),
        }
    }

    #[tokio::test]
    async fn test_cell_initializes_once() {
        let cell = AppContextCell::new();
        assert!(cell.get().is_none());

        let first = cell.get_or_init(options(None)).await.unwrap();
        let mut other = options(None);
        other.identity = DeviceIdentity::new("device_2", "Other");
        let second = cell.get_or_init(other).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.identity.device_id, "device_1");
    }

    #[tokio::test]
    async fn test_build_with_data_dir_persists_registry() {
        let temp_dir = TempDir::new().unwrap();
        let context = AppContext::build(options(Some(temp_dir.path().to_path_buf()))).unwrap();

        context
            .registry
            .upsert(crate::ApprovedDevice::new("device_2", "Laptop", "10.0.0.2", 8080));
        assert!(temp_dir.path().join(REGISTRY_FILE).exists());
    }

    #[tokio::test]
    async fn test_rescan_requires_running_server() {
        let context = AppContext::build(options(None)).unwrap();
        assert!(matches!(
            context.rescan().await,
            Err(ProtocolError::InvalidState(_))
        ));
    }
}
