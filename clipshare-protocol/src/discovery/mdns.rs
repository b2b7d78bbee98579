//! mDNS / DNS-SD adapter built on `mdns-sd`

use super::{
    DiscoveryEvent, DiscoveryProvider, DiscoveryState, ServiceAdvertisement, SERVICE_TYPE,
    TXT_DEVICE_ID, TXT_DEVICE_NAME, TXT_PORT,
};
use crate::identity::DeviceIdentity;
use crate::Result;
use async_trait::async_trait;
use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running advertisement plus its browse loop
struct MdnsSession {
    daemon: ServiceDaemon,
    fullname: String,
    browse_task: JoinHandle<()>,
}

/// Discovery over mDNS
pub struct MdnsDiscovery {
    state: Arc<DiscoveryState>,
    session: Mutex<Option<MdnsSession>>,
}

impl MdnsDiscovery {
    pub fn new() -> Self {
        Self {
            state: Arc::new(DiscoveryState::new()),
            session: Mutex::new(None),
        }
    }

    fn register(identity: &DeviceIdentity, port: u16) -> Result<(ServiceDaemon, String)> {
        let daemon = ServiceDaemon::new()?;

        let mut properties = HashMap::new();
        properties.insert(TXT_DEVICE_ID.to_string(), identity.device_id.clone());
        properties.insert(TXT_DEVICE_NAME.to_string(), identity.name.clone());
        properties.insert(TXT_PORT.to_string(), port.to_string());

        let host_name = format!("{}.local.", identity.device_id.replace('_', "-"));
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &identity.instance_name(),
            &host_name,
            "",
            port,
            properties,
        )?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        daemon.register(service)?;
        info!("Registered mDNS service {} on port {}", fullname, port);
        Ok((daemon, fullname))
    }
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryProvider for MdnsDiscovery {
    async fn start(&self, identity: &DeviceIdentity, port: u16) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            debug!("mDNS discovery already running");
            return Ok(());
        }

        info!(
            "Starting mDNS discovery as {} on port {}",
            identity.instance_name(),
            port
        );
        self.state.set_local_device_id(&identity.device_id);

        let (daemon, fullname) = Self::register(identity, port)
            .map_err(|e| self.state.report_error(format!("mDNS registration failed: {}", e)))?;
        let receiver = match daemon.browse(SERVICE_TYPE) {
            Ok(receiver) => receiver,
            Err(e) => {
                if let Err(e) = daemon.shutdown() {
                    debug!("mDNS daemon shutdown failed: {}", e);
                }
                return Err(self
                    .state
                    .report_error(format!("mDNS browse failed: {}", e)));
            }
        };

        let state = Arc::clone(&self.state);
        let browse_task = tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(resolved) => {
                        state.handle_advertisement(advertisement_from(&resolved));
                    }
                    ServiceEvent::ServiceRemoved(_service_type, fullname) => {
                        state.handle_removal(instance_name_of(&fullname));
                    }
                    ServiceEvent::SearchStarted(service_type) => {
                        debug!("mDNS search started for {}", service_type);
                    }
                    ServiceEvent::SearchStopped(service_type) => {
                        debug!("mDNS search stopped for {}", service_type);
                        break;
                    }
                    _ => {}
                }
            }
            debug!("mDNS browse loop finished");
        });

        *session = Some(MdnsSession {
            daemon,
            fullname,
            browse_task,
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
            info!("Stopping mDNS discovery");
            if let Err(e) = session.daemon.stop_browse(SERVICE_TYPE) {
                debug!("Failed to stop mDNS browse: {}", e);
            }
            if let Err(e) = session.daemon.unregister(&session.fullname) {
                warn!("Failed to unregister {}: {}", session.fullname, e);
            }
            if let Err(e) = session.daemon.shutdown() {
                debug!("mDNS daemon shutdown failed: {}", e);
            }
            session.browse_task.abort();
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

/// Strip `._clipboard._tcp.local.` from a full service name
fn instance_name_of(fullname: &str) -> &str {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
}

fn advertisement_from(resolved: &ResolvedService) -> ServiceAdvertisement {
    ServiceAdvertisement {
        instance_name: instance_name_of(&resolved.fullname).to_string(),
        addresses: resolved
            .addresses
            .iter()
            .map(|addr| addr.to_ip_addr())
            .collect(),
        port: resolved.port,
        properties: resolved
            .txt_properties
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_name_of() {
        assert_eq!(
            instance_name_of("Laptop (device_2)._clipboard._tcp.local."),
            "Laptop (device_2)"
        );
        assert_eq!(instance_name_of("unrelated"), "unrelated");
    }

    #[test]
    fn test_stop_when_not_running() {
        let discovery = MdnsDiscovery::new();
        discovery.stop();
        assert!(!discovery.is_running());
        assert!(discovery.snapshot().is_empty());
    }
}
