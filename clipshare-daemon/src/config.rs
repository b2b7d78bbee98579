//! Daemon Configuration
//!
//! TOML configuration for the clipshare daemon, plus the settings-store
//! adapter that exposes it to the protocol library.

use anyhow::{bail, Context, Result};
use clipshare_protocol::history::HistoryConfig;
use clipshare_protocol::transport::{ClientConfig, ServerConfig};
use clipshare_protocol::{
    ClipboardProvider, ContextOptions, DeviceIdentity, DiscoveryMethod, PairingConfig, Settings,
    SettingsStore,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Upper bound for `history.retention_days` (100 years)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub pairing: PairingSettings,

    #[serde(default)]
    pub clipboard: ClipboardConfig,

    #[serde(default)]
    pub history: HistorySettings,

    /// Storage paths
    pub paths: PathConfig,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name shown to peers
    pub name: String,

    /// Fixed device ID (a fresh one is generated per process if not set)
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP server base port
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Ports tried starting at `server_port`
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub discovery_method: DiscoveryMethod,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Pairing and heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSettings {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Approved devices not seen for this long are dropped
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Port assumed for peers discovery has no record of
    #[serde(default = "default_server_port")]
    pub default_peer_port: u16,

    /// Refuse to pair with peers whose port was never discovered
    #[serde(default)]
    pub require_discovered_port: bool,
}

/// Clipboard monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    /// Start the server and discovery when the daemon starts
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Push local clipboard changes to approved devices
    #[serde(default = "default_true")]
    pub monitor: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// History configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_true")]
    pub keep_history: bool,

    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Days to keep entries; -1 keeps them forever
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub config_dir: PathBuf,
    /// Approved devices and history
    pub data_dir: PathBuf,
}

fn default_server_port() -> u16 {
    clipshare_protocol::settings::DEFAULT_SERVER_PORT
}

fn default_max_port_attempts() -> u16 {
    5
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    3000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_items() -> usize {
    clipshare_protocol::history::DEFAULT_MAX_HISTORY_ITEMS
}

fn default_retention_days() -> i64 {
    -1
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            max_port_attempts: default_max_port_attempts(),
            bind_address: default_bind_address(),
            discovery_method: DiscoveryMethod::default(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            default_peer_port: default_server_port(),
            require_discovered_port: false,
        }
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            monitor: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            keep_history: true,
            max_items: default_max_items(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("clipshare")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("clipshare")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                name: hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "Clipshare Device".to_string()),
                device_id: None,
            },
            network: NetworkConfig::default(),
            pairing: PairingSettings::default(),
            clipboard: ClipboardConfig::default(),
            history: HistorySettings::default(),
            paths: PathConfig {
                config_dir: default_config_dir(),
                data_dir: default_data_dir(),
            },
        }
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        default_config_dir().join(CONFIG_FILE)
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, creating a default file if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            let mut config = Config::default();
            if let Some(parent) = path.parent() {
                config.paths.config_dir = parent.to_path_buf();
            }
            config.save_to(path)?;
            info!("Created default configuration at {}", path.display());
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        Ok(())
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            bail!("device.name must not be empty");
        }
        if self.network.max_port_attempts == 0 {
            bail!("network.max_port_attempts must be at least 1");
        }
        self.bind_address()?;
        if self.pairing.heartbeat_interval_secs == 0 {
            bail!("pairing.heartbeat_interval_secs must be positive");
        }
        if self.pairing.stale_after_secs < self.pairing.heartbeat_interval_secs {
            bail!("pairing.stale_after_secs must not be shorter than the heartbeat interval");
        }
        if self.clipboard.poll_interval_ms == 0 {
            bail!("clipboard.poll_interval_ms must be positive");
        }
        if self.history.max_items == 0 {
            bail!("history.max_items must be positive");
        }
        if self.history.retention_days < -1 || self.history.retention_days > MAX_RETENTION_DAYS {
            bail!(
                "history.retention_days must be -1 (keep forever) or between 0 and {}",
                MAX_RETENTION_DAYS
            );
        }
        Ok(())
    }

    fn bind_address(&self) -> Result<IpAddr> {
        self.network
            .bind_address
            .parse()
            .with_context(|| format!("Invalid network.bind_address '{}'", self.network.bind_address))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.paths
            .data_dir
            .join(clipshare_protocol::context::REGISTRY_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.paths
            .data_dir
            .join(clipshare_protocol::context::HISTORY_FILE)
    }

    /// Configured identity, or a fresh one for this process
    pub fn identity(&self) -> DeviceIdentity {
        match &self.device.device_id {
            Some(id) if !id.is_empty() => DeviceIdentity::new(id, &self.device.name),
            _ => DeviceIdentity::generate(&self.device.name),
        }
    }

    pub fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            base_port: self.network.server_port,
            max_port_attempts: self.network.max_port_attempts,
            bind_address: self.bind_address()?,
            shutdown_grace: Duration::from_millis(self.network.shutdown_grace_ms),
            shutdown_timeout: Duration::from_millis(self.network.shutdown_timeout_ms),
            max_body_bytes: self.network.max_body_bytes,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(self.network.request_timeout_ms),
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            ..Default::default()
        }
    }

    pub fn pairing_config(&self) -> PairingConfig {
        PairingConfig {
            heartbeat_interval: Duration::from_secs(self.pairing.heartbeat_interval_secs),
            stale_after: Duration::from_secs(self.pairing.stale_after_secs),
            default_peer_port: self.pairing.default_peer_port,
            require_discovered_port: self.pairing.require_discovered_port,
        }
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            keep_history: self.history.keep_history,
            max_items: self.history.max_items,
            retention_days: self.history.retention_days,
        }
    }

    /// Everything the protocol library needs to build its context
    pub fn context_options(&self, clipboard: Arc<dyn ClipboardProvider>) -> Result<ContextOptions> {
        Ok(ContextOptions {
            identity: self.identity(),
            server: self.server_config()?,
            client: self.client_config(),
            pairing: self.pairing_config(),
            history: self.history_config(),
            discovery_method: self.network.discovery_method,
            data_dir: Some(self.paths.data_dir.clone()),
            clipboard,
        })
    }

    /// User-facing settings view of this configuration
    pub fn to_settings(&self) -> Settings {
        Settings {
            device_name: self.device.name.clone(),
            server_port: self.network.server_port,
            auto_start: self.clipboard.auto_start,
            discovery_method: self.network.discovery_method,
            keep_history: self.history.keep_history,
            history_retention_days: self.history.retention_days,
            max_history_items: self.history.max_items,
        }
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.device.name = settings.device_name.clone();
        self.network.server_port = settings.server_port;
        self.clipboard.auto_start = settings.auto_start;
        self.network.discovery_method = settings.discovery_method;
        self.history.keep_history = settings.keep_history;
        self.history.retention_days = settings.history_retention_days;
        self.history.max_items = settings.max_history_items;
    }
}

/// [`SettingsStore`] backed by the daemon's TOML file
pub struct ConfigSettingsStore {
    path: PathBuf,
}

impl ConfigSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Option<Config> {
        if !self.path.exists() {
            return None;
        }
        let contents = fs::read_to_string(&self.path).ok()?;
        match toml::from_str(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Unreadable config at {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl SettingsStore for ConfigSettingsStore {
    fn load(&self) -> Option<Settings> {
        self.read().map(|config| config.to_settings())
    }

    fn save(&self, settings: &Settings) -> bool {
        let mut config = self.read().unwrap_or_else(|| {
            let mut config = Config::default();
            if let Some(parent) = self.path.parent() {
                config.paths.config_dir = parent.to_path_buf();
            }
            config
        });
        config.apply_settings(settings);

        if let Err(e) = config.validate() {
            warn!("Refusing to save invalid settings: {:#}", e);
            return false;
        }
        match config.save_to(&self.path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save settings: {:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.server_port, 8080);
        assert_eq!(config.network.max_port_attempts, 5);
        assert_eq!(config.pairing.heartbeat_interval_secs, 30);
        assert_eq!(config.pairing.stale_after_secs, 180);
        assert_eq!(config.history.retention_days, -1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_file_fills_defaults() {
        let toml = r#"
            [device]
            name = "Desk"

            [network]
            discovery_method = "multicast"

            [paths]
            config_dir = "/tmp/clipshare"
            data_dir = "/tmp/clipshare/data"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.network.discovery_method, DiscoveryMethod::Multicast);
        assert_eq!(config.network.server_port, 8080);
        assert_eq!(config.network.request_timeout_ms, 5000);
        assert_eq!(config.clipboard.poll_interval_ms, 500);
        assert_eq!(config.history.max_items, 100);
    }

    #[test]
    fn test_load_from_creates_default() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.paths.config_dir, temp_dir.path());

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.device.name, created.device.name);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.network.bind_address = "not-an-ip".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pairing.stale_after_secs = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.max_port_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_retention_days() {
        let mut config = Config::default();
        config.history.retention_days = -1;
        assert!(config.validate().is_ok());

        config.history.retention_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());

        config.history.retention_days = MAX_RETENTION_DAYS + 1;
        assert!(config.validate().is_err());

        config.history.retention_days = i64::MAX;
        assert!(config.validate().is_err());

        config.history.retention_days = -2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity_uses_fixed_id() {
        let mut config = Config::default();
        config.device.device_id = Some("device_42".to_string());
        assert_eq!(config.identity().device_id, "device_42");

        config.device.device_id = None;
        assert!(config.identity().device_id.starts_with("device_"));
    }

    #[test]
    fn test_settings_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigSettingsStore::new(temp_dir.path().join(CONFIG_FILE));
        assert!(store.load().is_none());

        let mut settings = Settings::with_device_name("Laptop");
        settings.server_port = 9090;
        settings.discovery_method = DiscoveryMethod::Multicast;
        assert!(store.save(&settings));

        let loaded = store.load().unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_settings_store_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigSettingsStore::new(temp_dir.path().join(CONFIG_FILE));

        let mut settings = Settings::with_device_name("Laptop");
        settings.max_history_items = 0;
        assert!(!store.save(&settings));
        assert!(store.load().is_none());
    }
}
