//! Outbound calls to a peer's [`ClipboardServer`](super::ClipboardServer)
//!
//! Nothing here returns an error to the caller. Timeouts, refused
//! connections and undecodable bodies are logged and folded into `false`
//! or `None`, so pairing and sync code never has to unwind a failed call.

use super::retry::RetrySchedule;
use super::{
    ApproveBody, DiscoverResponse, UnpairBody, ROUTE_APPROVE, ROUTE_APPROVE_DEVICE,
    ROUTE_CLIPBOARD, ROUTE_DISCOVER, ROUTE_PING, ROUTE_UNPAIR_DEVICE,
};
use crate::message::ClipboardMessage;
use crate::Result;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Client tuning
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Delays used by the pairing calls
    pub retry_delays: Vec<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_delays: super::retry::DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

/// HTTP client for the peer protocol
#[derive(Debug, Clone)]
pub struct ClipboardClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ClipboardClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /discover`
    pub async fn discover_device(&self, ip: &str, port: u16) -> Option<DiscoverResponse> {
        let url = endpoint(ip, port, ROUTE_DISCOVER);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Discover request to {} failed: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Discover request to {} returned {}", url, response.status());
            return None;
        }

        match response.json::<DiscoverResponse>().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Invalid discover response from {}: {}", url, e);
                None
            }
        }
    }

    /// `GET /ping`; true for any 2xx
    pub async fn ping(&self, ip: &str, port: u16) -> bool {
        let url = endpoint(ip, port, ROUTE_PING);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Ping to {} failed: {}", url, e);
                false
            }
        }
    }

    /// `POST /clipboard`
    pub async fn send_clipboard(&self, ip: &str, port: u16, message: &ClipboardMessage) -> bool {
        let url = endpoint(ip, port, ROUTE_CLIPBOARD);
        match self.http.post(&url).json(message).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Sent clipboard ({} chars) to {}", message.text.len(), url);
                true
            }
            Ok(response) => {
                warn!("Clipboard push to {} returned {}", url, response.status());
                false
            }
            Err(e) => {
                warn!("Clipboard push to {} failed: {}", url, e);
                false
            }
        }
    }

    /// `POST /approve`: ask a peer to pair with us
    pub async fn request_approval(
        &self,
        ip: &str,
        port: u16,
        device_id: &str,
        device_name: &str,
    ) -> bool {
        let body = ApproveBody {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
        };
        self.post_with_retry(ip, port, ROUTE_APPROVE, &body).await
    }

    /// `POST /approve-device`: confirm we accepted a peer's request
    pub async fn approve_device(
        &self,
        ip: &str,
        port: u16,
        device_id: &str,
        device_name: &str,
    ) -> bool {
        let body = ApproveBody {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
        };
        self.post_with_retry(ip, port, ROUTE_APPROVE_DEVICE, &body).await
    }

    /// `POST /unpair-device`
    pub async fn unpair_device(&self, ip: &str, port: u16, device_id: &str) -> bool {
        let body = UnpairBody {
            device_id: device_id.to_string(),
        };
        self.post_with_retry(ip, port, ROUTE_UNPAIR_DEVICE, &body).await
    }

    async fn post_with_retry<B: Serialize + ?Sized>(
        &self,
        ip: &str,
        port: u16,
        route: &str,
        body: &B,
    ) -> bool {
        let url = endpoint(ip, port, route);
        let mut schedule = RetrySchedule::new(self.config.retry_delays.clone());

        while let Some(delay) = schedule.next_delay() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.http.post(&url).json(body).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("POST {} succeeded ({})", url, schedule.status());
                    return true;
                }
                Ok(response) => {
                    warn!(
                        "POST {} returned {} ({})",
                        url,
                        response.status(),
                        schedule.status()
                    );
                }
                Err(e) => {
                    warn!("POST {} failed: {} ({})", url, e, schedule.status());
                }
            }
        }

        warn!(
            "POST {} gave up after {} attempts",
            url,
            schedule.max_attempts()
        );
        false
    }
}

/// `http://ip:port/route`, bracketing IPv6 literals
fn endpoint(ip: &str, port: u16, route: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("http://[{}]:{}{}", v6, port, route),
        _ => format!("http://{}:{}{}", ip, port, route),
    }
}
