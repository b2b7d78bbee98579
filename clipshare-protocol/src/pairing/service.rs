//! Pairing Service
//!
//! Drives the approval handshake, unpairing, manual additions and the
//! heartbeat for one device. The service owns every write to the
//! [`DeviceRegistry`]; the HTTP server only queues what it receives.

use super::events::PairingEvent;
use crate::device::{current_timestamp_millis, ApprovedDevice};
use crate::discovery::DiscoveryProvider;
use crate::identity::DeviceIdentity;
use crate::registry::DeviceRegistry;
use crate::settings::DEFAULT_SERVER_PORT;
use crate::snapshot::Snapshot;
use crate::transport::{
    ApprovalRequest, ClipboardClient, DeviceApproval, ServerInbox, UnpairNotification,
};
use crate::{ProtocolError, Result};
use futures::future::join_all;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Heartbeat interval (30 seconds)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Approved devices not seen for this long are pruned (3 minutes)
pub const STALE_AFTER: Duration = Duration::from_secs(180);

/// Prefix of synthesized ids for manually added devices
pub const MANUAL_DEVICE_PREFIX: &str = "manual_";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pairing service configuration
#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    /// Port assumed for a peer that discovery has no record of
    pub default_peer_port: u16,
    /// Refuse to pair when the peer's port was never discovered
    pub require_discovered_port: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            stale_after: STALE_AFTER,
            default_peer_port: DEFAULT_SERVER_PORT,
            require_discovered_port: false,
        }
    }
}

struct HeartbeatHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Pairing state machine for the local device
pub struct PairingService {
    identity: DeviceIdentity,
    config: PairingConfig,
    registry: Arc<DeviceRegistry>,
    client: ClipboardClient,
    inbox: Arc<ServerInbox>,
    discovery: Arc<dyn DiscoveryProvider>,
    /// Request ids already announced through `RequestReceived`
    announced: Mutex<HashSet<String>>,
    event_tx: broadcast::Sender<PairingEvent>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl PairingService {
    pub fn new(
        identity: DeviceIdentity,
        config: PairingConfig,
        registry: Arc<DeviceRegistry>,
        client: ClipboardClient,
        inbox: Arc<ServerInbox>,
        discovery: Arc<dyn DiscoveryProvider>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            identity,
            config,
            registry,
            client,
            inbox,
            discovery,
            announced: Mutex::new(HashSet::new()),
            event_tx,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PairingEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn approved_devices(&self) -> Snapshot<ApprovedDevice> {
        self.registry.snapshot()
    }

    pub fn pending_requests(&self) -> Snapshot<ApprovalRequest> {
        self.inbox.approval_requests()
    }

    pub fn is_approved(&self, device_id: &str) -> bool {
        self.registry.contains(device_id)
    }

    fn emit(&self, event: PairingEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Ask a discovered peer to pair with us
    ///
    /// Does not touch the registry: the peer is only added once it
    /// confirms through `/approve-device`. Returns true when the request
    /// was delivered or the device is already approved.
    pub async fn approve_discovered_device(
        &self,
        device_id: &str,
        device_name: &str,
        ip_address: &str,
        port: u16,
    ) -> bool {
        if self.registry.contains(device_id) {
            debug!("Device {} is already approved", device_id);
            return true;
        }

        info!(
            "Requesting pairing with {} ({}) at {}:{}",
            device_name, device_id, ip_address, port
        );
        let sent = self
            .client
            .request_approval(
                ip_address,
                port,
                &self.identity.device_id,
                &self.identity.name,
            )
            .await;

        if sent {
            self.emit(PairingEvent::RequestSent {
                device_id: device_id.to_string(),
                device_name: device_name.to_string(),
            });
        } else {
            warn!("Pairing request to {} was not delivered", device_id);
            self.emit(PairingEvent::RequestFailed {
                device_id: device_id.to_string(),
                reason: format!("{}:{} did not respond", ip_address, port),
            });
        }
        sent
    }

    /// Accept a pending request
    ///
    /// Stores the requester, confirms back to it and clears the request.
    /// With `require_discovered_port` set and no discovery record, fails
    /// with [`ProtocolError::PortUnknown`] and leaves the request pending.
    pub async fn approve_device(&self, request: &ApprovalRequest) -> Result<ApprovedDevice> {
        let port = self.resolve_peer_port(&request.device_id)?;
        let device = ApprovedDevice::new(
            &request.device_id,
            &request.device_name,
            &request.ip_address,
            port,
        );

        info!(
            "Approving {} ({}) at {}",
            device.name,
            device.device_id,
            device.address()
        );
        self.registry.upsert(device.clone());

        let confirmed = self
            .client
            .approve_device(
                &device.ip_address,
                device.port,
                &self.identity.device_id,
                &self.identity.name,
            )
            .await;
        if !confirmed {
            warn!(
                "Could not confirm approval to {} at {}",
                device.device_id,
                device.address()
            );
        }

        self.inbox.remove_approval_request(&request.device_id);
        self.forget_announced(&request.device_id);
        self.emit(PairingEvent::DeviceApproved {
            device: device.clone(),
        });
        Ok(device)
    }

    /// Discard a pending request without adding the device
    pub fn reject_approval_request(&self, request: &ApprovalRequest) {
        info!(
            "Rejecting pairing request from {} ({})",
            request.device_name, request.device_id
        );
        self.inbox.remove_approval_request(&request.device_id);
        self.forget_announced(&request.device_id);
        self.emit(PairingEvent::RequestRejected {
            device_id: request.device_id.clone(),
        });
    }

    /// Handle a peer's confirmation of our request
    ///
    /// Returns true when the device was newly added. The notice is cleared
    /// in every case.
    pub fn handle_device_approval(&self, approval: &DeviceApproval) -> bool {
        if self.registry.contains(&approval.device_id) {
            debug!("Device {} already approved", approval.device_id);
            self.inbox.remove_device_approval(&approval.device_id);
            return false;
        }

        let port = match self.resolve_peer_port(&approval.device_id) {
            Ok(port) => port,
            Err(e) => {
                warn!("Dropping approval from {}: {}", approval.device_id, e);
                self.inbox.remove_device_approval(&approval.device_id);
                return false;
            }
        };

        let device = ApprovedDevice::new(
            &approval.device_id,
            &approval.device_name,
            &approval.ip_address,
            port,
        );
        info!(
            "Pairing completed with {} ({}) at {}",
            device.name,
            device.device_id,
            device.address()
        );
        self.registry.upsert(device.clone());
        self.inbox.remove_device_approval(&approval.device_id);
        self.emit(PairingEvent::DeviceApproved { device });
        true
    }

    /// Remove a device and tell it we unpaired
    ///
    /// The local removal stands even when the peer cannot be reached.
    pub async fn unpair_device(&self, device_id: &str) -> Result<()> {
        let device = self
            .registry
            .remove(device_id)
            .ok_or_else(|| ProtocolError::DeviceNotFound(device_id.to_string()))?;

        info!("Unpaired {} ({})", device.name, device.device_id);
        self.emit(PairingEvent::DeviceUnpaired {
            device_id: device_id.to_string(),
            by_peer: false,
        });

        let notified = self
            .client
            .unpair_device(&device.ip_address, device.port, &self.identity.device_id)
            .await;
        if !notified {
            warn!(
                "Could not notify {} at {} about unpairing",
                device_id,
                device.address()
            );
        }
        Ok(())
    }

    /// Handle a peer's unpair notice; the notice is always cleared
    pub fn handle_device_unpair(&self, notification: &UnpairNotification) -> bool {
        let removed = self.registry.remove(&notification.device_id).is_some();
        if removed {
            info!("Device {} unpaired from us", notification.device_id);
            self.emit(PairingEvent::DeviceUnpaired {
                device_id: notification.device_id.clone(),
                by_peer: true,
            });
        }
        self.inbox
            .remove_unpair_notification(&notification.device_id);
        removed
    }

    pub fn update_last_seen(&self, device_id: &str) -> bool {
        self.registry
            .update_last_seen(device_id, current_timestamp_millis())
    }

    /// Handle every queued approval and unpair notice, and announce new
    /// approval requests
    pub fn process_inbox(&self) {
        for approval in self.inbox.device_approvals().iter() {
            self.handle_device_approval(approval);
        }

        for notification in self.inbox.unpair_notifications().iter() {
            self.handle_device_unpair(notification);
        }

        let requests = self.inbox.approval_requests();
        let mut announced = self.announced.lock().unwrap_or_else(PoisonError::into_inner);
        announced.retain(|id| requests.iter().any(|r| &r.device_id == id));
        for request in requests.iter() {
            if announced.insert(request.device_id.clone()) {
                let _ = self.event_tx.send(PairingEvent::RequestReceived {
                    request: request.clone(),
                });
            }
        }
    }

    fn forget_announced(&self, device_id: &str) {
        self.announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id);
    }

    /// Listening port of a peer for the registry entry
    fn resolve_peer_port(&self, device_id: &str) -> Result<u16> {
        if let Some(discovered) = self.discovery.find(device_id) {
            return Ok(discovered.port);
        }

        if self.config.require_discovered_port {
            return Err(ProtocolError::PortUnknown(device_id.to_string()));
        }

        warn!(
            "No discovery record for {}, assuming port {}",
            device_id, self.config.default_peer_port
        );
        Ok(self.config.default_peer_port)
    }

    /// One heartbeat round
    ///
    /// Pings every approved device and refreshes `last_seen` on success,
    /// then prunes devices that did not answer and whose `last_seen` was
    /// already older than the threshold when the round started. Returns
    /// the pruned devices.
    pub async fn heartbeat_tick(&self) -> Vec<ApprovedDevice> {
        let devices = self.registry.snapshot();
        if devices.is_empty() {
            return Vec::new();
        }
        debug!("Heartbeat: pinging {} device(s)", devices.len());

        let pings = devices.iter().map(|device| async move {
            let reachable = self.client.ping(&device.ip_address, device.port).await;
            (device, reachable)
        });
        let mut answered = HashSet::new();
        for (device, reachable) in join_all(pings).await {
            if reachable {
                self.update_last_seen(&device.device_id);
                answered.insert(device.device_id.as_str());
            } else {
                debug!("Heartbeat: {} unreachable", device.device_id);
            }
        }

        let now = current_timestamp_millis();
        let max_age = i64::try_from(self.config.stale_after.as_millis()).unwrap_or(i64::MAX);
        let stale: Vec<String> = devices
            .iter()
            .filter(|device| !answered.contains(device.device_id.as_str()))
            .filter(|device| device.is_stale(now, max_age))
            .map(|device| device.device_id.clone())
            .collect();
        if stale.is_empty() {
            return Vec::new();
        }

        let pruned = self.registry.remove_many(&stale);
        for device in &pruned {
            info!(
                "Pruned {} ({}), last seen {} ms ago",
                device.name,
                device.device_id,
                device.age_millis(now)
            );
            self.emit(PairingEvent::DevicePruned {
                device_id: device.device_id.clone(),
            });
        }
        pruned
    }

    /// Run [`heartbeat_tick`](Self::heartbeat_tick) every interval
    pub fn start_heartbeat(self: &Arc<Self>) {
        let mut heartbeat = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner);
        if heartbeat.is_some() {
            debug!("Heartbeat already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let service = Arc::clone(self);
        let period = self.config.heartbeat_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        service.heartbeat_tick().await;
                    }
                }
            }
            debug!("Heartbeat stopped");
        });

        info!("Heartbeat started ({:?} interval)", period);
        *heartbeat = Some(HeartbeatHandle { shutdown_tx, task });
    }

    pub fn stop_heartbeat(&self) {
        let handle = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(());
            handle.task.abort();
            info!("Heartbeat stopped");
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Pair with a device by address, without a handshake
    ///
    /// The address must be a dotted-quad IPv4 address and answer `/ping`.
    pub async fn add_manual_device(
        &self,
        ip_address: &str,
        port: u32,
        name: &str,
    ) -> Result<ApprovedDevice> {
        let ip: Ipv4Addr = ip_address
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(ip_address.to_string()))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ProtocolError::InvalidPort(port))?;
        let ip_address = ip.to_string();

        if let Some(existing) = self.registry.find_by_address(&ip_address, port) {
            return Err(ProtocolError::DeviceExists(format!(
                "{} at {}",
                existing.name,
                existing.address()
            )));
        }

        if !self.client.ping(&ip_address, port).await {
            return Err(ProtocolError::Unreachable(format!("{}:{}", ip_address, port)));
        }

        let device_id = format!("{}{}", MANUAL_DEVICE_PREFIX, current_timestamp_millis());
        let device = ApprovedDevice::new(device_id, name, ip_address, port);
        info!("Manually added {} at {}", device.name, device.address());
        self.registry.upsert(device.clone());
        self.emit(PairingEvent::ManualDeviceAdded {
            device: device.clone(),
        });
        Ok(device)
    }
}
