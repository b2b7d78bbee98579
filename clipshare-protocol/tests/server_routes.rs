//! Server Route Tests
//!
//! Drives the peer protocol router in-process:
//! - discovery and liveness responses
//! - clipboard pushes reaching the inbox verbatim
//! - approval requests with self-loop guard and pending dedup
//! - caller IP resolution
//! - rejection of malformed and oversized bodies

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use clipshare_protocol::transport::{build_router, AppState, ServerInbox};
use clipshare_protocol::{ClipboardMessage, DeviceIdentity};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

const LOCAL_ID: &str = "device_1000";

fn app_with_state(state: AppState) -> Router {
    build_router(state).layer(MockConnectInfo(SocketAddr::from(([192, 168, 1, 50], 40000))))
}

fn app() -> (Router, Arc<ServerInbox>) {
    let inbox = Arc::new(ServerInbox::new());
    let state = AppState::new(
        DeviceIdentity::new(LOCAL_ID, "Desk"),
        8080,
        Arc::clone(&inbox),
    );
    (app_with_state(state), inbox)
}

/// Send a request and return (status, parsed JSON body or Null)
async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(request).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    post(uri, body.to_string())
}

#[tokio::test]
async fn test_discover_returns_identity() {
    let (app, _) = app();
    let (status, body) = send(app, get("/discover")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"deviceId": LOCAL_ID, "name": "Desk"}));
}

#[tokio::test]
async fn test_ping_reports_liveness() {
    let (app, _) = app();
    let (status, body) = send(app, get("/ping")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["deviceId"], LOCAL_ID);
    assert_eq!(body["deviceName"], "Desk");
    assert_eq!(body["port"], 8080);
}

#[tokio::test]
async fn test_clipboard_push_queued_verbatim() {
    let (app, inbox) = app();
    let message = ClipboardMessage {
        text: "héllo\nwörld".to_string(),
        device_id: "device_2000".to_string(),
        device_name: "Laptop".to_string(),
        timestamp: 1_700_000_000_123,
    };

    let (status, body) = send(
        app,
        post_json("/clipboard", serde_json::to_value(&message).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "received"}));
    assert_eq!(inbox.messages().as_ref(), &vec![message]);
}

#[tokio::test]
async fn test_approve_requested_then_duplicate() {
    let (app, inbox) = app();
    let body = json!({"deviceId": "device_2000", "deviceName": "Laptop"});

    let (_, first) = send(app.clone(), post_json("/approve", body.clone())).await;
    let (_, second) = send(app, post_json("/approve", body)).await;

    assert_eq!(first["status"], "requested");
    assert_eq!(second["status"], "duplicate");

    let requests = inbox.approval_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].device_name, "Laptop");
    assert_eq!(requests[0].ip_address, "192.168.1.50");
}

#[tokio::test]
async fn test_approve_from_self_ignored() {
    let (app, inbox) = app();
    let (status, body) = send(
        app,
        post_json("/approve", json!({"deviceId": LOCAL_ID, "deviceName": "Desk"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(inbox.approval_requests().is_empty());
}

#[tokio::test]
async fn test_approve_records_forwarded_ip() {
    let (app, inbox) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/approve")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "10.1.2.3, 192.168.1.1")
        .body(Body::from(
            json!({"deviceId": "device_2000", "deviceName": "Laptop"}).to_string(),
        ))
        .unwrap();

    send(app, request).await;
    assert_eq!(inbox.approval_requests()[0].ip_address, "10.1.2.3");
}

#[tokio::test]
async fn test_approve_device_queues_approval() {
    let (app, inbox) = app();

    let (_, body) = send(
        app.clone(),
        post_json(
            "/approve-device",
            json!({"deviceId": "device_2000", "deviceName": "Laptop"}),
        ),
    )
    .await;
    assert_eq!(body["status"], "approved");

    let (_, body) = send(
        app,
        post_json(
            "/approve-device",
            json!({"deviceId": LOCAL_ID, "deviceName": "Desk"}),
        ),
    )
    .await;
    assert_eq!(body["status"], "ignored");

    let approvals = inbox.device_approvals();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].device_id, "device_2000");
    assert_eq!(approvals[0].ip_address, "192.168.1.50");
}

#[tokio::test]
async fn test_unpair_device_queues_notice() {
    let (app, inbox) = app();
    let (status, body) = send(
        app,
        post_json("/unpair-device", json!({"deviceId": "device_2000"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "unpaired"}));
    assert_eq!(inbox.unpair_notifications()[0].device_id, "device_2000");
}

#[tokio::test]
async fn test_malformed_payloads_rejected() {
    let (app, inbox) = app();

    let (status, _) = send(app.clone(), post("/approve", "{not json")).await;
    assert!(status.is_client_error(), "got {status}");

    let (status, _) = send(
        app.clone(),
        post_json("/approve", json!({"deviceId": "device_2000"})),
    )
    .await;
    assert!(status.is_client_error(), "got {status}");

    let (status, _) = send(app, post_json("/clipboard", json!({"text": "only text"}))).await;
    assert!(status.is_client_error(), "got {status}");

    assert!(inbox.approval_requests().is_empty());
    assert!(inbox.messages().is_empty());
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let inbox = Arc::new(ServerInbox::new());
    let mut state = AppState::new(
        DeviceIdentity::new(LOCAL_ID, "Desk"),
        8080,
        Arc::clone(&inbox),
    );
    state.max_body_bytes = 64;
    let app = app_with_state(state);

    let message = ClipboardMessage::new("x".repeat(1024), "device_2000", "Laptop");
    let (status, _) = send(
        app,
        post_json("/clipboard", serde_json::to_value(&message).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(inbox.messages().is_empty());
}

#[tokio::test]
async fn test_unknown_route() {
    let (app, _) = app();
    let (status, _) = send(app, get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
