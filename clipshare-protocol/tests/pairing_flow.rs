//! Pairing Flow Tests
//!
//! Two in-process devices talking over loopback:
//! - approval symmetry (nobody stores a peer before it confirmed)
//! - pending request dedup
//! - unpair propagation
//! - heartbeat pruning
//! - manual device validation

use clipshare_protocol::discovery::{ServiceAdvertisement, TXT_DEVICE_ID, TXT_PORT};
use clipshare_protocol::transport::{
    ClientConfig, ClipboardClient, ClipboardServer, ServerConfig, ServerInbox,
};
use clipshare_protocol::{
    current_timestamp_millis, ApprovedDevice, DeviceIdentity, DeviceRegistry, DiscoveryProvider,
    MulticastDiscovery, PairingConfig, PairingEvent, PairingService, ProtocolError,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

struct Node {
    identity: DeviceIdentity,
    server: ClipboardServer,
    port: u16,
    discovery: Arc<MulticastDiscovery>,
    pairing: Arc<PairingService>,
}

impl Node {
    async fn start(device_id: &str, name: &str) -> Self {
        let identity = DeviceIdentity::new(device_id, name);
        let server = ClipboardServer::new(
            identity.clone(),
            ServerConfig {
                base_port: 0,
                bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                shutdown_grace: Duration::from_millis(200),
                shutdown_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );
        let port = server.start().await.unwrap();

        let client = ClipboardClient::new(ClientConfig {
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(1000),
            ..Default::default()
        })
        .unwrap();
        let discovery = Arc::new(MulticastDiscovery::with_defaults());
        discovery.state().set_local_device_id(device_id);

        let pairing = Arc::new(PairingService::new(
            identity.clone(),
            PairingConfig::default(),
            Arc::new(DeviceRegistry::in_memory()),
            client,
            server.inbox(),
            discovery.clone(),
        ));

        Self {
            identity,
            server,
            port,
            discovery,
            pairing,
        }
    }

    /// Make `other` visible to this node's discovery
    fn discover(&self, other: &Node) {
        let mut properties = HashMap::new();
        properties.insert(TXT_DEVICE_ID.to_string(), other.identity.device_id.clone());
        properties.insert(TXT_PORT.to_string(), other.port.to_string());
        self.discovery
            .state()
            .handle_advertisement(ServiceAdvertisement {
                instance_name: other.identity.instance_name(),
                addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
                port: other.port,
                properties,
            })
            .expect("peer recorded");
    }

    async fn stop(&self) {
        self.pairing.stop_heartbeat();
        self.server.stop().await;
    }
}

async fn paired_nodes() -> (Node, Node) {
    let a = Node::start("device_100", "Alpha").await;
    let b = Node::start("device_200", "Beta").await;
    a.discover(&b);
    b.discover(&a);
    (a, b)
}

#[tokio::test]
async fn test_approval_symmetry() {
    let (a, b) = paired_nodes().await;

    let sent = a
        .pairing
        .approve_discovered_device(&b.identity.device_id, &b.identity.name, "127.0.0.1", b.port)
        .await;
    assert!(sent);
    assert!(!a.pairing.is_approved("device_200"));

    let requests = b.pairing.pending_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].device_id, "device_100");

    let approved = b.pairing.approve_device(&requests[0]).await.unwrap();
    assert_eq!(approved.port, a.port);
    assert!(b.pairing.is_approved("device_100"));
    assert!(b.pairing.pending_requests().is_empty());

    // A only stores B once it handles B's confirmation
    assert!(!a.pairing.is_approved("device_200"));
    a.pairing.process_inbox();

    let devices = a.pairing.approved_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, "device_200");
    assert_eq!(devices[0].port, b.port);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_pending_request_dedup() {
    let (a, b) = paired_nodes().await;

    for _ in 0..2 {
        a.pairing
            .approve_discovered_device("device_200", "Beta", "127.0.0.1", b.port)
            .await;
    }
    assert_eq!(b.pairing.pending_requests().len(), 1);

    let mut events = b.pairing.subscribe();
    b.pairing.process_inbox();
    match events.recv().await.unwrap() {
        PairingEvent::RequestReceived { request } => assert_eq!(request.device_id, "device_100"),
        other => panic!("unexpected event {other:?}"),
    }

    let request = b.pairing.pending_requests()[0].clone();
    b.pairing.reject_approval_request(&request);
    assert!(b.pairing.pending_requests().is_empty());
    assert!(!b.pairing.is_approved("device_100"));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unpair_propagates_to_peer() {
    let (a, b) = paired_nodes().await;
    a.pairing
        .approve_discovered_device("device_200", "Beta", "127.0.0.1", b.port)
        .await;
    let request = b.pairing.pending_requests()[0].clone();
    b.pairing.approve_device(&request).await.unwrap();
    a.pairing.process_inbox();
    assert!(a.pairing.is_approved("device_200"));

    a.pairing.unpair_device("device_200").await.unwrap();
    assert!(!a.pairing.is_approved("device_200"));

    b.pairing.process_inbox();
    assert!(!b.pairing.is_approved("device_100"));
    assert!(b.server.inbox().unpair_notifications().is_empty());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_local_unpair_survives_unreachable_peer() {
    let (a, b) = paired_nodes().await;
    let b_port = b.port;
    b.stop().await;

    a.pairing
        .registry()
        .upsert(ApprovedDevice::new("device_200", "Beta", "127.0.0.1", b_port));
    a.pairing.unpair_device("device_200").await.unwrap();
    assert!(!a.pairing.is_approved("device_200"));

    a.stop().await;
}

#[tokio::test]
async fn test_heartbeat_prunes_only_stale_devices() {
    let (a, b) = paired_nodes().await;
    let registry = a.pairing.registry();
    let now = current_timestamp_millis();

    // Reachable and recent: refreshed
    let mut live = ApprovedDevice::new("device_200", "Beta", "127.0.0.1", b.port);
    live.last_seen = now - 10_000;
    registry.upsert(live);

    // Unreachable but recent: kept
    let mut recent = ApprovedDevice::new("device_300", "Gamma", "127.0.0.1", 9);
    recent.last_seen = now - 60_000;
    registry.upsert(recent);

    // Unreachable and stale: pruned
    let mut stale = ApprovedDevice::new("device_400", "Delta", "127.0.0.1", 9);
    stale.last_seen = now - 200_000;
    registry.upsert(stale);

    // Stale when the round started but answered the ping: kept and refreshed
    let mut stale_live = ApprovedDevice::new("device_500", "Epsilon", "127.0.0.1", b.port);
    stale_live.last_seen = now - 200_000;
    registry.upsert(stale_live);

    let pruned = a.pairing.heartbeat_tick().await;
    let pruned_ids: Vec<_> = pruned.into_iter().map(|d| d.device_id).collect();
    assert_eq!(pruned_ids, vec!["device_400"]);

    assert!(registry.contains("device_300"));
    assert!(registry.get("device_200").unwrap().last_seen >= now);
    assert!(registry.get("device_500").unwrap().last_seen >= now);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_manual_add() {
    let (a, b) = paired_nodes().await;

    assert!(matches!(
        a.pairing.add_manual_device("999.1.1.1", 8080, "x").await,
        Err(ProtocolError::InvalidAddress(_))
    ));
    assert!(matches!(
        a.pairing.add_manual_device("10.0.0.5", 70000, "x").await,
        Err(ProtocolError::InvalidPort(70000))
    ));

    let device = a
        .pairing
        .add_manual_device("127.0.0.1", u32::from(b.port), "Beta")
        .await
        .unwrap();
    assert!(device.device_id.starts_with("manual_"));
    assert_eq!(a.pairing.approved_devices().len(), 1);

    assert!(matches!(
        a.pairing
            .add_manual_device("127.0.0.1", u32::from(b.port), "Beta")
            .await,
        Err(ProtocolError::DeviceExists(_))
    ));
    assert_eq!(a.pairing.approved_devices().len(), 1);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_approve_without_discovery_uses_default_port() {
    let a = Node::start("device_100", "Alpha").await;
    let b = Node::start("device_200", "Beta").await;
    // B never discovered A
    a.pairing
        .approve_discovered_device("device_200", "Beta", "127.0.0.1", b.port)
        .await;

    let request = b.pairing.pending_requests()[0].clone();
    let approved = b.pairing.approve_device(&request).await.unwrap();
    assert_eq!(approved.port, 8080);
    assert!(b.discovery.find("device_100").is_none());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_restart_keeps_live_persisted_devices() {
    let b = Node::start("device_200", "Beta").await;
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("approved_devices.json");

    // Written by a previous run that ended ten minutes ago
    {
        let registry = DeviceRegistry::new(&path).unwrap();
        let mut device = ApprovedDevice::new("device_200", "Beta", "127.0.0.1", b.port);
        device.last_seen = current_timestamp_millis() - 600_000;
        registry.upsert(device);
    }

    let registry = Arc::new(DeviceRegistry::new(&path).unwrap());
    assert!(registry.contains("device_200"));

    let client = ClipboardClient::new(ClientConfig {
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(1000),
        ..Default::default()
    })
    .unwrap();
    let pairing = PairingService::new(
        DeviceIdentity::new("device_100", "Alpha"),
        PairingConfig::default(),
        Arc::clone(&registry),
        client,
        Arc::new(ServerInbox::new()),
        Arc::new(MulticastDiscovery::with_defaults()),
    );

    let pruned = pairing.heartbeat_tick().await;
    assert!(pruned.is_empty());
    assert!(registry.contains("device_200"));

    let reloaded = DeviceRegistry::new(&path).unwrap();
    assert!(reloaded.contains("device_200"));

    b.stop().await;
}
