//! Raw gateway port-mapping capability
//!
//! [`PortMapper`] is the seam between the NAT manager and the gateway control
//! protocols. [`IgdPortMapper`] is the production implementation: UPnP first,
//! NAT-PMP as a fallback when enabled, with optional renewal of every mapping
//! before its lease runs out.

use super::gateway;
use super::natpmp;
use super::types::{MapRequest, MappingError, MappingProtocol, OpenMapping};
use super::upnp;
use crate::config::MappingConfig;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Gateway operations used by the NAT manager
///
/// Implementations perform a single attempt per call; retrying is layered on
/// top by [`GatewayClient`](super::client::GatewayClient).
#[async_trait]
pub trait PortMapper: Send + Sync {
    /// Forward `request.public_port` on the gateway to `request.private_port`
    async fn map(&self, request: MapRequest) -> Result<(), MappingError>;

    /// Remove every mapping this instance opened
    async fn destroy(&self) -> Result<(), MappingError>;

    /// The gateway's external (WAN) address
    async fn external_ip(&self) -> Result<IpAddr, MappingError>;
}

/// Builds the mapper for a manager's first eligible address
pub type PortMapperFactory =
    Arc<dyn Fn(&MappingConfig) -> Result<Box<dyn PortMapper>, MappingError> + Send + Sync>;

/// Factory producing [`IgdPortMapper`] instances
pub fn igd_factory() -> PortMapperFactory {
    Arc::new(|config: &MappingConfig| {
        let mapper: Box<dyn PortMapper> = Box::new(IgdPortMapper::new(config));
        Ok(mapper)
    })
}

/// Single-attempt gateway control calls used by [`IgdPortMapper`]
#[async_trait]
pub(crate) trait GatewayProtocols: Send + Sync {
    async fn upnp_map(
        &self,
        gateway: Option<IpAddr>,
        request: MapRequest,
        lifetime_secs: u32,
        description: String,
    ) -> Result<(), MappingError>;

    async fn upnp_unmap(
        &self,
        gateway: Option<IpAddr>,
        request: MapRequest,
    ) -> Result<(), MappingError>;

    async fn upnp_external_ip(&self, gateway: Option<IpAddr>) -> Result<IpAddr, MappingError>;

    /// Returns the external port the gateway assigned; lifetime 0 deletes
    async fn natpmp_map(
        &self,
        gateway: IpAddr,
        request: MapRequest,
        lifetime_secs: u32,
    ) -> Result<u16, MappingError>;

    async fn natpmp_external_ip(&self, gateway: IpAddr) -> Result<IpAddr, MappingError>;

    fn resolve_gateway(&self, configured: Option<IpAddr>) -> Result<IpAddr, MappingError>;
}

/// UPnP over igd-next and NAT-PMP over UDP
struct NetworkProtocols;

#[async_trait]
impl GatewayProtocols for NetworkProtocols {
    async fn upnp_map(
        &self,
        gateway: Option<IpAddr>,
        request: MapRequest,
        lifetime_secs: u32,
        description: String,
    ) -> Result<(), MappingError> {
        upnp::upnp_map(gateway, request, lifetime_secs, description).await
    }

    async fn upnp_unmap(
        &self,
        gateway: Option<IpAddr>,
        request: MapRequest,
    ) -> Result<(), MappingError> {
        upnp::upnp_unmap(gateway, request).await
    }

    async fn upnp_external_ip(&self, gateway: Option<IpAddr>) -> Result<IpAddr, MappingError> {
        upnp::upnp_external_ip(gateway).await
    }

    async fn natpmp_map(
        &self,
        gateway: IpAddr,
        request: MapRequest,
        lifetime_secs: u32,
    ) -> Result<u16, MappingError> {
        natpmp::natpmp_map(gateway, request, lifetime_secs).await
    }

    async fn natpmp_external_ip(&self, gateway: IpAddr) -> Result<IpAddr, MappingError> {
        natpmp::natpmp_external_ip(gateway).await
    }

    fn resolve_gateway(&self, configured: Option<IpAddr>) -> Result<IpAddr, MappingError> {
        gateway::resolve_gateway(configured)
    }
}

/// UPnP IGD port mapper with NAT-PMP fallback
pub struct IgdPortMapper {
    config: MappingConfig,
    protocols: Arc<dyn GatewayProtocols>,
    open: Mutex<Vec<OpenMapping>>,
    renewals: Mutex<Vec<JoinHandle<()>>>,
}

impl IgdPortMapper {
    /// Create a mapper bound to the given configuration
    pub fn new(config: &MappingConfig) -> Self {
        Self::with_protocols(config, Arc::new(NetworkProtocols))
    }

    pub(crate) fn with_protocols(
        config: &MappingConfig,
        protocols: Arc<dyn GatewayProtocols>,
    ) -> Self {
        Self {
            config: config.clone(),
            protocols,
            open: Mutex::new(Vec::new()),
            renewals: Mutex::new(Vec::new()),
        }
    }

    /// Mappings currently held open on the gateway
    pub fn open_mappings(&self) -> Vec<OpenMapping> {
        self.open
            .lock()
            .map(|open| open.clone())
            .unwrap_or_default()
    }

    async fn map_natpmp(&self, request: MapRequest) -> Result<(), MappingError> {
        let gateway = self.protocols.resolve_gateway(self.config.gateway)?;
        let assigned = self
            .protocols
            .natpmp_map(gateway, request, self.config.ttl_secs)
            .await?;

        if assigned != request.public_port {
            // Observed addresses carry the requested port
            let release = MapRequest {
                public_port: assigned,
                ..request
            };
            if let Err(e) = self.protocols.natpmp_map(gateway, release, 0).await {
                warn!(
                    "Failed to release reassigned NAT-PMP port {}: {}",
                    assigned, e
                );
            }
            return Err(MappingError::GatewayError(format!(
                "NAT-PMP assigned port {} instead of {}",
                assigned, request.public_port
            )));
        }

        Ok(())
    }

    fn spawn_renewal(&self, mapping: OpenMapping) {
        let config = self.config.clone();
        let protocols = self.protocols.clone();
        let interval = Duration::from_secs((config.ttl_secs as f64 * 0.8) as u64);

        let task = tokio::spawn(async move {
            loop {
                debug!(
                    "Next renewal of {} {} in {:?}",
                    mapping.request.protocol, mapping.request.public_port, interval
                );
                tokio::time::sleep(interval).await;

                let renewed = match mapping.via {
                    MappingProtocol::UPnP => {
                        protocols
                            .upnp_map(
                                config.gateway,
                                mapping.request,
                                config.ttl_secs,
                                config.description.clone(),
                            )
                            .await
                    }
                    MappingProtocol::NATPMP => match protocols.resolve_gateway(config.gateway) {
                        Ok(gateway) => protocols
                            .natpmp_map(gateway, mapping.request, config.ttl_secs)
                            .await
                            .map(|_| ()),
                        Err(e) => Err(e),
                    },
                };

                match renewed {
                    Ok(()) => info!(
                        "Port mapping renewed: {} {}",
                        mapping.request.protocol, mapping.request.public_port
                    ),
                    Err(e) => error!("Failed to renew port mapping: {}", e),
                }
            }
        });

        if let Ok(mut renewals) = self.renewals.lock() {
            renewals.push(task);
        }
    }
}

#[async_trait]
impl PortMapper for IgdPortMapper {
    async fn map(&self, request: MapRequest) -> Result<(), MappingError> {
        let via = match self
            .protocols
            .upnp_map(
                self.config.gateway,
                request,
                self.config.ttl_secs,
                self.config.description.clone(),
            )
            .await
        {
            Ok(()) => MappingProtocol::UPnP,
            Err(e) if self.config.enable_pmp => {
                warn!("UPnP mapping failed ({}), falling back to NAT-PMP", e);
                self.map_natpmp(request).await?;
                MappingProtocol::NATPMP
            }
            Err(e) => return Err(e),
        };

        let mapping = OpenMapping { request, via };
        if let Ok(mut open) = self.open.lock() {
            open.push(mapping);
        }

        if self.config.auto_renew {
            self.spawn_renewal(mapping);
        }

        Ok(())
    }

    async fn destroy(&self) -> Result<(), MappingError> {
        if let Ok(mut renewals) = self.renewals.lock() {
            for task in renewals.drain(..) {
                task.abort();
            }
        }

        let open = match self.open.lock() {
            Ok(mut open) => std::mem::take(&mut *open),
            Err(_) => Vec::new(),
        };

        let mut first_error = None;
        let mut failed = Vec::new();

        for mapping in open {
            let removed = match mapping.via {
                MappingProtocol::UPnP => {
                    self.protocols
                        .upnp_unmap(self.config.gateway, mapping.request)
                        .await
                }
                MappingProtocol::NATPMP => match self.protocols.resolve_gateway(self.config.gateway) {
                    Ok(gateway) => self
                        .protocols
                        .natpmp_map(gateway, mapping.request, 0)
                        .await
                        .map(|_| ()),
                    Err(e) => Err(e),
                },
            };

            if let Err(e) = removed {
                warn!(
                    "Failed to remove mapping {} {}: {}",
                    mapping.request.protocol, mapping.request.public_port, e
                );
                failed.push(mapping);
                first_error.get_or_insert(e);
            }
        }

        // Keep what could not be removed so a retried destroy tries again
        if let Ok(mut open) = self.open.lock() {
            open.extend(failed);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn external_ip(&self) -> Result<IpAddr, MappingError> {
        match self.protocols.upnp_external_ip(self.config.gateway).await {
            Ok(ip) => Ok(ip),
            Err(e) if self.config.enable_pmp => {
                warn!("UPnP external IP query failed ({}), trying NAT-PMP", e);
                let gateway = self.protocols.resolve_gateway(self.config.gateway)?;
                self.protocols.natpmp_external_ip(gateway).await
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for IgdPortMapper {
    fn drop(&mut self) {
        if let Ok(mut renewals) = self.renewals.lock() {
            for task in renewals.drain(..) {
                task.abort();
            }
        }
    }
}
