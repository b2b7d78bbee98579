//! HTTP server receiving clipboard pushes and pairing calls
//!
//! The server binds the base port, walking up to the next ports when the
//! address is in use, and exposes what it receives through a
//! [`ServerInbox`]. Handlers never touch the device registry.

use super::inbox::{ApprovalRequest, DeviceApproval, ServerInbox, UnpairNotification};
use super::{
    ApproveBody, DiscoverResponse, PingResponse, StatusResponse, UnpairBody, ROUTE_APPROVE,
    ROUTE_APPROVE_DEVICE, ROUTE_CLIPBOARD, ROUTE_DISCOVER, ROUTE_PING, ROUTE_UNPAIR_DEVICE,
    STATUS_APPROVED, STATUS_DUPLICATE, STATUS_IGNORED, STATUS_OK, STATUS_RECEIVED,
    STATUS_REQUESTED, STATUS_UNPAIRED,
};
use crate::identity::DeviceIdentity;
use crate::message::ClipboardMessage;
use crate::settings::DEFAULT_SERVER_PORT;
use crate::{ProtocolError, Result};
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Default number of ports tried, starting at the base port
pub const DEFAULT_MAX_PORT_ATTEMPTS: u16 = 5;

/// Default request body limit (10 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Server tuning
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_port: u16,
    pub max_port_attempts: u16,
    pub bind_address: IpAddr,
    /// Time in-flight requests get after shutdown is signalled
    pub shutdown_grace: Duration,
    /// Extra time before the server task is aborted
    pub shutdown_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_SERVER_PORT,
            max_port_attempts: DEFAULT_MAX_PORT_ATTEMPTS,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shutdown_grace: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_millis(3000),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// State shared by the route handlers
#[derive(Clone)]
pub struct AppState {
    pub identity: DeviceIdentity,
    /// Port reported by `/ping`
    pub port: u16,
    pub inbox: Arc<ServerInbox>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(identity: DeviceIdentity, port: u16, inbox: Arc<ServerInbox>) -> Self {
        Self {
            identity,
            port,
            inbox,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Build the peer protocol router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route(ROUTE_DISCOVER, get(discover))
        .route(ROUTE_PING, get(ping))
        .route(ROUTE_CLIPBOARD, post(receive_clipboard))
        .route(ROUTE_APPROVE, post(approve))
        .route(ROUTE_APPROVE_DEVICE, post(approve_device))
        .route(ROUTE_UNPAIR_DEVICE, post(unpair_device))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /discover`
async fn discover(State(state): State<AppState>) -> Json<DiscoverResponse> {
    Json(DiscoverResponse {
        device_id: state.identity.device_id.clone(),
        name: state.identity.name.clone(),
    })
}

/// `GET /ping`
async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        status: STATUS_OK.to_string(),
        device_id: state.identity.device_id.clone(),
        device_name: state.identity.name.clone(),
        port: state.port,
    })
}

/// `POST /clipboard`
async fn receive_clipboard(
    State(state): State<AppState>,
    Json(message): Json<ClipboardMessage>,
) -> Json<StatusResponse> {
    info!(
        "Received clipboard ({} chars) from {} ({})",
        message.text.len(),
        message.device_name,
        message.device_id
    );
    state.inbox.push_message(message);
    Json(StatusResponse::new(STATUS_RECEIVED))
}

/// `POST /approve`
async fn approve(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ApproveBody>,
) -> Json<StatusResponse> {
    if body.device_id == state.identity.device_id {
        debug!("Ignoring approval request from ourselves");
        return Json(StatusResponse::new(STATUS_IGNORED));
    }

    let request = ApprovalRequest {
        device_id: body.device_id,
        device_name: body.device_name,
        ip_address: client_ip(&headers, remote),
    };
    info!(
        "Approval request from {} ({}) at {}",
        request.device_name, request.device_id, request.ip_address
    );

    if state.inbox.try_enqueue_request(request) {
        Json(StatusResponse::new(STATUS_REQUESTED))
    } else {
        Json(StatusResponse::new(STATUS_DUPLICATE))
    }
}

/// `POST /approve-device`
async fn approve_device(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ApproveBody>,
) -> Json<StatusResponse> {
    if body.device_id == state.identity.device_id {
        debug!("Ignoring device approval from ourselves");
        return Json(StatusResponse::new(STATUS_IGNORED));
    }

    let approval = DeviceApproval {
        device_id: body.device_id,
        device_name: body.device_name,
        ip_address: client_ip(&headers, remote),
    };
    info!(
        "Device {} ({}) approved our pairing request",
        approval.device_name, approval.device_id
    );
    state.inbox.push_approval(approval);
    Json(StatusResponse::new(STATUS_APPROVED))
}

/// `POST /unpair-device`
async fn unpair_device(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<UnpairBody>,
) -> Json<StatusResponse> {
    info!("Device {} unpaired from us", body.device_id);
    state.inbox.push_unpair(UnpairNotification {
        device_id: body.device_id,
        ip_address: client_ip(&headers, remote),
    });
    Json(StatusResponse::new(STATUS_UNPAIRED))
}

/// Reachable address of the caller
///
/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    remote.ip().to_canonical().to_string()
}

struct ServerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The peer protocol HTTP server
pub struct ClipboardServer {
    identity: DeviceIdentity,
    config: ServerConfig,
    inbox: Arc<ServerInbox>,
    running: AtomicBool,
    actual_port: AtomicU16,
    handle: Mutex<Option<ServerHandle>>,
}

impl ClipboardServer {
    pub fn new(identity: DeviceIdentity, config: ServerConfig) -> Self {
        Self {
            identity,
            config,
            inbox: Arc::new(ServerInbox::new()),
            running: AtomicBool::new(false),
            actual_port: AtomicU16::new(0),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn inbox(&self) -> Arc<ServerInbox> {
        Arc::clone(&self.inbox)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound port while running
    pub fn actual_port(&self) -> Option<u16> {
        if self.is_running() {
            Some(self.actual_port.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Bind and start serving; returns the bound port
    ///
    /// Calling this while running returns the current port.
    pub async fn start(&self) -> Result<u16> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() && self.is_running() {
            let port = self.actual_port.load(Ordering::SeqCst);
            debug!("Server already running on port {}", port);
            return Ok(port);
        }

        let listener = self.bind().await?;
        let port = listener
            .local_addr()
            .map_err(|e| ProtocolError::from_io_error(e, "read bound address"))?
            .port();

        let mut state = AppState::new(self.identity.clone(), port, Arc::clone(&self.inbox));
        state.max_body_bytes = self.config.max_body_bytes;
        let app = build_router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;

            match result {
                Ok(()) => debug!("HTTP server task finished"),
                Err(e) => error!("HTTP server error: {}", e),
            }
        });

        self.actual_port.store(port, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        *handle = Some(ServerHandle { shutdown_tx, task });

        info!(
            "Clipboard server listening on {}:{}",
            self.config.bind_address, port
        );
        Ok(port)
    }

    async fn bind(&self) -> Result<TcpListener> {
        let first = self.config.base_port;
        let attempts = self.config.max_port_attempts.max(1);
        let mut last = first;

        for offset in 0..attempts {
            let Some(port) = first.checked_add(offset) else {
                break;
            };
            last = port;

            match TcpListener::bind((self.config.bind_address, port)).await {
                Ok(listener) => {
                    if offset > 0 {
                        info!("Port {} in use, bound fallback port {}", first, port);
                    }
                    return Ok(listener);
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    warn!("Port {} is in use, trying next port", port);
                }
                Err(e) => {
                    error!("Failed to bind port {}: {}", port, e);
                    return Err(ProtocolError::from_io_error(e, "bind server port"));
                }
            }
        }

        Err(ProtocolError::PortsExhausted { first, last })
    }

    /// Stop serving and clear every inbound queue
    ///
    /// No-op when the server is not running.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let Some(ServerHandle {
            shutdown_tx,
            mut task,
        }) = self.handle.lock().await.take()
        else {
            debug!("Server not running");
            return;
        };

        info!("Stopping clipboard server");
        let _ = shutdown_tx.send(());

        let limit = self.config.shutdown_grace + self.config.shutdown_timeout;
        if tokio::time::timeout(limit, &mut task).await.is_err() {
            warn!(
                "Server did not shut down within {:?}, aborting",
                limit
            );
            task.abort();
        }

        self.actual_port.store(0, Ordering::SeqCst);
        self.inbox.clear_all();
        info!("Clipboard server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn remote() -> SocketAddr {
        "192.168.1.77:51234".parse().unwrap()
    }

    #[test]
    fn test_client_ip_forwarded_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("10.0.0.5, 172.16.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers, remote()), "10.0.0.5");
    }

    #[test]
    fn test_client_ip_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers, remote()), "10.0.0.9");
    }

    #[test]
    fn test_client_ip_socket_fallback() {
        assert_eq!(client_ip(&HeaderMap::new(), remote()), "192.168.1.77");

        let mapped: SocketAddr = "[::ffff:192.168.1.78]:4000".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), mapped), "192.168.1.78");
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let server = ClipboardServer::new(
            DeviceIdentity::new("device_1", "Desk"),
            ServerConfig::default(),
        );
        server.stop().await;
        assert!(!server.is_running());
        assert_eq!(server.actual_port(), None);
    }
}
