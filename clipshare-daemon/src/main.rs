mod clipboard;
mod config;
mod diagnostics;

use anyhow::{Context, Result};
use clap::Parser;
use clipshare_protocol::{
    current_timestamp_millis, AppContext, AppContextCell, ClipboardClient, ClipboardHistory,
    ClipboardMessage, ClipboardProvider, DeviceRegistry, DiscoveryEvent, PairingEvent,
    SettingsStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use clipboard::SystemClipboard;
use config::{Config, ConfigSettingsStore};
use diagnostics::{BuildInfo, Cli, DiagnosticCommand};

/// Clipshare daemon
///
/// Owns the application context and the background tasks that feed
/// inbound server queues into the sync and pairing services.
struct Daemon {
    config: Config,
    auto_accept: bool,
    context: Arc<AppContext>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    async fn new(config: Config, auto_accept: bool, cell: &AppContextCell) -> Result<Self> {
        Self::with_clipboard(config, auto_accept, cell, Arc::new(SystemClipboard::new())).await
    }

    async fn with_clipboard(
        config: Config,
        auto_accept: bool,
        cell: &AppContextCell,
        clipboard: Arc<dyn ClipboardProvider>,
    ) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create directories")?;

        let options = config.context_options(clipboard)?;
        let context = cell
            .get_or_init(options)
            .await
            .context("Failed to build application context")?;

        let pruned = context
            .history
            .apply_retention(current_timestamp_millis());
        if pruned > 0 {
            info!("Dropped {} history entries past retention", pruned);
        }

        info!(
            "Device {} ({}), {} approved device(s)",
            context.identity.name,
            context.identity.device_id,
            context.registry.device_count()
        );

        Ok(Self {
            config,
            auto_accept,
            context,
            tasks: Vec::new(),
        })
    }

    /// Start the server, discovery and heartbeat
    ///
    /// Returns false when the server could not be started; the daemon
    /// keeps running without networking in that case.
    async fn start_network(&self) -> bool {
        match self.context.start().await {
            Ok(port) => {
                info!("Listening for peers on port {}", port);
                true
            }
            Err(e) => {
                error!("Failed to start networking, running offline: {:#}", e);
                false
            }
        }
    }

    /// Apply received clipboard pushes as they arrive
    fn start_message_consumer(&mut self) {
        let inbox = self.context.server.inbox();
        let sync = Arc::clone(&self.context.sync);
        let mut rx = inbox.subscribe_messages();

        self.tasks.push(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                if rx.borrow_and_update().is_empty() {
                    continue;
                }
                for message in inbox.drain_messages() {
                    sync.handle_received_message(&message);
                }
            }
            debug!("Message consumer stopped");
        }));
    }

    /// Process approvals, unpair notices and new requests as they arrive
    fn start_pairing_consumer(&mut self) {
        let inbox = self.context.server.inbox();
        let pairing = Arc::clone(&self.context.pairing);
        let mut requests = inbox.subscribe_approval_requests();
        let mut approvals = inbox.subscribe_device_approvals();
        let mut unpairs = inbox.subscribe_unpair_notifications();

        self.tasks.push(tokio::spawn(async move {
            loop {
                let changed = tokio::select! {
                    r = requests.changed() => r,
                    r = approvals.changed() => r,
                    r = unpairs.changed() => r,
                };
                if changed.is_err() {
                    break;
                }
                requests.borrow_and_update();
                approvals.borrow_and_update();
                unpairs.borrow_and_update();
                pairing.process_inbox();
            }
            debug!("Pairing consumer stopped");
        }));
    }

    /// Log pairing events and, with auto-accept, approve incoming requests
    fn start_pairing_events(&mut self) {
        let pairing = Arc::clone(&self.context.pairing);
        let mut events = pairing.subscribe();
        let auto_accept = self.auto_accept;

        self.tasks.push(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} pairing events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                match &event {
                    PairingEvent::RequestReceived { request } => {
                        info!(
                            "Pairing request from {} ({}) at {}",
                            request.device_name, request.device_id, request.ip_address
                        );
                        if auto_accept {
                            if let Err(e) = pairing.approve_device(request).await {
                                warn!("Auto-accept of {} failed: {}", request.device_id, e);
                            }
                        } else {
                            info!("Request left pending; restart with --auto-accept to approve");
                        }
                    }
                    PairingEvent::RequestFailed { device_id, reason } => {
                        warn!("Pairing request to {} failed: {}", device_id, reason);
                    }
                    other => info!("Pairing: {:?}", other),
                }
            }
        }));
    }

    fn start_discovery_log(&mut self) {
        let mut events = self.context.discovery.subscribe_events();

        self.tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DiscoveryEvent::DeviceAdded { device }) => {
                        info!("Discovered {} at {}:{}", device.name, device.ip_address, device.port)
                    }
                    Ok(DiscoveryEvent::DeviceRemoved { device_id }) => {
                        info!("Lost {}", device_id)
                    }
                    Ok(DiscoveryEvent::Error { message }) => warn!("Discovery: {}", message),
                    Ok(other) => debug!("Discovery: {:?}", other),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Poll the system clipboard and push changes to approved devices
    fn start_clipboard_monitor(&mut self) {
        if !self.config.clipboard.monitor {
            info!("Clipboard monitor disabled");
            return;
        }

        let sync = Arc::clone(&self.context.sync);
        let poll_interval = Duration::from_millis(self.config.clipboard.poll_interval_ms);
        info!("Clipboard monitor started (polling every {:?})", poll_interval);

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Some(results) = sync.sync_local_change().await {
                    let delivered = results.iter().filter(|r| r.success).count();
                    debug!(
                        "Clipboard change pushed to {}/{} devices",
                        delivered,
                        results.len()
                    );
                    for failed in results.iter().filter(|r| !r.success) {
                        warn!(
                            "Push to {} failed: {}",
                            failed.device_name,
                            failed.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            }
        }));
    }

    /// Run until Ctrl+C
    async fn run(&self) -> Result<()> {
        info!("Clipshare daemon running, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
        Ok(())
    }

    async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.context.shutdown().await;
        info!("Clipshare daemon stopped");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")
}

async fn handle_diagnostic_command(cli: &Cli, command: &DiagnosticCommand) -> Result<()> {
    match command {
        DiagnosticCommand::Version { verbose } => {
            BuildInfo::get().display(*verbose);
            Ok(())
        }
        DiagnosticCommand::DumpConfig => {
            let config = load_config(cli.config.as_ref())?;
            let contents = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", contents);
            Ok(())
        }
        DiagnosticCommand::Ping { ip, port } => {
            let client = ClipboardClient::with_defaults()?;
            if client.ping(ip, *port).await {
                println!("{}:{} is reachable", ip, port);
            } else {
                println!("{}:{} did not answer", ip, port);
            }
            Ok(())
        }
        DiagnosticCommand::Discover { ip, port } => {
            let client = ClipboardClient::with_defaults()?;
            match client.discover_device(ip, *port).await {
                Some(info) => println!("{} ({})", info.name, info.device_id),
                None => println!("No clipshare device at {}:{}", ip, port),
            }
            Ok(())
        }
        DiagnosticCommand::Send { ip, port, text } => {
            let config = load_config(cli.config.as_ref())?;
            let identity = config.identity();
            let client = ClipboardClient::new(config.client_config())?;
            let message = ClipboardMessage::new(text.as_str(), &identity.device_id, &identity.name);
            if client.send_clipboard(ip, *port, &message).await {
                println!("Sent {} chars to {}:{}", text.len(), ip, port);
                Ok(())
            } else {
                anyhow::bail!("{}:{} did not accept the clipboard", ip, port)
            }
        }
        DiagnosticCommand::ListDevices { verbose } => {
            let config = load_config(cli.config.as_ref())?;
            let registry = DeviceRegistry::new(config.registry_path())
                .context("Failed to load device registry")?;

            println!("\n=== Approved Devices ===");
            let devices = registry.snapshot();
            if devices.is_empty() {
                println!("No devices approved.");
            } else {
                let now = current_timestamp_millis();
                for device in devices.iter() {
                    println!("{} ({})", device.name, device.device_id);
                    if *verbose {
                        println!("  Address: {}", device.address());
                        println!(
                            "  Last seen: {}",
                            diagnostics::format_age(now, device.last_seen)
                        );
                        println!();
                    }
                }
                println!("\nTotal: {} devices", devices.len());
            }
            Ok(())
        }
        DiagnosticCommand::History { search, limit } => {
            let config = load_config(cli.config.as_ref())?;
            let history = ClipboardHistory::with_path(
                config.history_config(),
                config.history_path(),
            )
            .context("Failed to load clipboard history")?;

            let entries = match search {
                Some(query) => history.search(query),
                None => history.recent(*limit),
            };
            if entries.is_empty() {
                println!("No history entries.");
            }
            let now = current_timestamp_millis();
            for entry in entries.iter().take(*limit) {
                let preview: String = entry.text.chars().take(60).collect();
                println!(
                    "[{}] {} ({}): {}",
                    diagnostics::format_age(now, entry.timestamp),
                    entry.source_device_name,
                    entry.id,
                    preview.replace('\n', " ")
                );
            }
            Ok(())
        }
        DiagnosticCommand::Settings {
            device_name,
            server_port,
        } => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let store = ConfigSettingsStore::new(&path);
            let mut settings = store.load().unwrap_or_default();

            if device_name.is_some() || server_port.is_some() {
                if let Some(name) = device_name {
                    settings.device_name = name.clone();
                }
                if let Some(port) = server_port {
                    settings.server_port = *port;
                }
                if !store.save(&settings) {
                    anyhow::bail!("Failed to save settings to {}", path.display());
                }
                println!("Settings saved to {}", path.display());
            }

            println!(
                "{}",
                serde_json::to_string_pretty(&settings).context("Failed to serialize settings")?
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Diagnostic commands run without the daemon
    if let Some(command) = &cli.command {
        return handle_diagnostic_command(&cli, command).await;
    }

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting clipshare daemon...");

    let config = load_config(cli.config.as_ref())?;
    info!("Device name: {}", config.device.name);
    info!("Server port: {}", config.network.server_port);
    info!("Discovery: {:?}", config.network.discovery_method);

    let cell = AppContextCell::new();
    let mut daemon = Daemon::new(config, cli.auto_accept, &cell)
        .await
        .context("Failed to create daemon")?;

    daemon.start_message_consumer();
    daemon.start_pairing_consumer();
    daemon.start_pairing_events();
    daemon.start_discovery_log();

    if daemon.config.clipboard.auto_start {
        if daemon.start_network().await {
            daemon.start_clipboard_monitor();
        }
    } else {
        info!("Auto-start disabled, not joining the network");
    }

    let result = daemon.run().await;
    if let Err(e) = &result {
        error!("Daemon error: {:#}", e);
    }

    daemon.shutdown().await;
    result
}
