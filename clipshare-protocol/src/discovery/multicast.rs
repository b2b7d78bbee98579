//! UDP Multicast Discovery
//!
//! Fallback for networks where mDNS is filtered. Every peer periodically
//! sends a small JSON beacon to a fixed multicast group and listens on the
//! same group. Peers that stay silent longer than the timeout are dropped,
//! and a goodbye beacon is sent on stop so peers forget us immediately.

use super::{
    DiscoveryEvent, DiscoveryProvider, DiscoveryState, ServiceAdvertisement, TXT_DEVICE_ID,
    TXT_DEVICE_NAME, TXT_PORT,
};
use crate::identity::DeviceIdentity;
use crate::{ProtocolError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Multicast group joined by every peer
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 43, 21);

/// UDP port of the multicast group
pub const MULTICAST_PORT: u16 = 4321;

/// Default beacon interval (3 seconds)
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(3);

/// Default peer timeout (15 seconds)
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_BEACON_SIZE: usize = 2048;

/// Configuration for multicast discovery
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// How often to send our beacon
    pub announce_interval: Duration,
    /// How long a peer may stay silent before it is dropped
    pub peer_timeout: Duration,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: MULTICAST_GROUP,
            port: MULTICAST_PORT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }
}

/// Datagram payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Beacon {
    device_id: String,
    device_name: String,
    port: u16,
    #[serde(default)]
    goodbye: bool,
}

impl Beacon {
    fn for_identity(identity: &DeviceIdentity, port: u16, goodbye: bool) -> Self {
        Self {
            device_id: identity.device_id.clone(),
            device_name: identity.name.clone(),
            port,
            goodbye,
        }
    }

    fn to_advertisement(&self, source: SocketAddr) -> ServiceAdvertisement {
        let mut properties = HashMap::new();
        properties.insert(TXT_DEVICE_ID.to_string(), self.device_id.clone());
        properties.insert(TXT_DEVICE_NAME.to_string(), self.device_name.clone());
        properties.insert(TXT_PORT.to_string(), self.port.to_string());

        ServiceAdvertisement {
            instance_name: format!("{} ({})", self.device_name, self.device_id),
            addresses: vec![source.ip()],
            port: self.port,
            properties,
        }
    }
}

struct MulticastSession {
    socket: Arc<UdpSocket>,
    goodbye: Vec<u8>,
    shutdown_tx: oneshot::Sender<()>,
}

/// Discovery over UDP multicast beacons
pub struct MulticastDiscovery {
    state: Arc<DiscoveryState>,
    config: MulticastConfig,
    session: Mutex<Option<MulticastSession>>,
}

impl MulticastDiscovery {
    pub fn new(config: MulticastConfig) -> Self {
        Self {
            state: Arc::new(DiscoveryState::new()),
            config,
            session: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MulticastConfig::default())
    }

    /// Bind the group port, falling back to an ephemeral port
    ///
    /// With the fallback we can still announce ourselves but will not
    /// hear other peers; this happens when another process on the host
    /// already owns the group port.
    fn bind_socket(config: &MulticastConfig) -> Result<StdUdpSocket> {
        let socket = match StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)) {
            Ok(socket) => {
                info!("Bound multicast discovery to UDP port {}", config.port);
                socket
            }
            Err(e) => {
                warn!(
                    "Failed to bind multicast port {}: {}. Announcing only.",
                    config.port, e
                );
                StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
                    .map_err(|e| ProtocolError::from_io_error(e, "bind multicast socket"))?
            }
        };

        if let Err(e) = socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED) {
            warn!("Failed to join multicast group {}: {}", config.group, e);
        }
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn handle_datagram(
        state: &DiscoveryState,
        last_seen: &mut HashMap<String, Instant>,
        data: &[u8],
        source: SocketAddr,
    ) {
        let beacon: Beacon = match serde_json::from_slice(data) {
            Ok(beacon) => beacon,
            Err(e) => {
                debug!("Ignoring malformed beacon from {}: {}", source, e);
                return;
            }
        };

        if state.is_self("", &beacon.device_id) {
            return;
        }

        if beacon.goodbye {
            last_seen.remove(&beacon.device_id);
            state.remove_device(&beacon.device_id);
            return;
        }

        last_seen.insert(beacon.device_id.clone(), Instant::now());
        state.handle_advertisement(beacon.to_advertisement(source));
    }

    fn sweep(state: &DiscoveryState, last_seen: &mut HashMap<String, Instant>, timeout: Duration) {
        let timed_out: Vec<String> = last_seen
            .iter()
            .filter(|(_, seen)| seen.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for device_id in timed_out {
            info!("Device timed out: {}", device_id);
            last_seen.remove(&device_id);
            state.remove_device(&device_id);
        }
    }
}

#[async_trait]
impl DiscoveryProvider for MulticastDiscovery {
    async fn start(&self, identity: &DeviceIdentity, port: u16) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            debug!("Multicast discovery already running");
            return Ok(());
        }

        self.state.set_local_device_id(&identity.device_id);
        let socket = Self::bind_socket(&self.config)
            .and_then(|socket| Ok(UdpSocket::from_std(socket)?))
            .map_err(|e| {
                self.state
                    .report_error(format!("multicast socket setup failed: {}", e))
            })?;
        let socket = Arc::new(socket);

        let hello = serde_json::to_vec(&Beacon::for_identity(identity, port, false))?;
        let goodbye = serde_json::to_vec(&Beacon::for_identity(identity, port, true))?;
        let group = SocketAddr::V4(SocketAddrV4::new(self.config.group, self.config.port));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task_socket = Arc::clone(&socket);
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        tokio::spawn(async move {
            let mut announce = interval(config.announce_interval);
            let mut sweep = interval(Duration::from_secs(5));
            let mut last_seen: HashMap<String, Instant> = HashMap::new();
            let mut buf = [0u8; MAX_BEACON_SIZE];

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Multicast discovery shutting down");
                        break;
                    }
                    _ = announce.tick() => {
                        if let Err(e) = task_socket.send_to(&hello, group).await {
                            warn!("Failed to send discovery beacon: {}", e);
                        }
                    }
                    _ = sweep.tick() => {
                        Self::sweep(&state, &mut last_seen, config.peer_timeout);
                    }
                    received = task_socket.recv_from(&mut buf) => {
                        match received {
                            Ok((size, source)) => {
                                Self::handle_datagram(&state, &mut last_seen, &buf[..size], source);
                            }
                            Err(e) => {
                                state.report_error(format!("beacon receive failed: {}", e));
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        }
                    }
                }
            }
        });

        info!(
            "Multicast discovery started on {}:{} (advertising port {})",
            self.config.group, self.config.port, port
        );
        *session = Some(MulticastSession {
            socket,
            goodbye,
            shutdown_tx,
        });
        self.state.emit(DiscoveryEvent::ServiceStarted { port });
        Ok(())
    }

    fn stop(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(session) = session {
            info!("Stopping multicast discovery");
            let group = SocketAddr::V4(SocketAddrV4::new(self.config.group, self.config.port));
            if let Err(e) = session.socket.try_send_to(&session.goodbye, group) {
                debug!("Failed to send goodbye beacon: {}", e);
            }
            let _ = session.shutdown_tx.send(());
            self.state.emit(DiscoveryEvent::ServiceStopped);
        }

        self.state.clear();
    }

    fn is_running(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn state(&self) -> &DiscoveryState {
        &self.state
    }
}
