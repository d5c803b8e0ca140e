//! NAT manager: maps a node's listen addresses through the local gateway
//!
//! [`NatManager::start`] never blocks and never fails node startup. The
//! mapping procedure runs as a detached task and every error it hits is only
//! logged; without a mapping the node simply stays privately reachable.

use super::classifier::{detect_cgnat, is_eligible, is_private_ip};
use super::client::GatewayClient;
use super::mapper::{igd_factory, PortMapperFactory};
use super::types::{IpProtocol, MapRequest};
use crate::address::{from_node_address, Multiaddr, ThinWaistAddress};
use crate::config::{MappingConfig, NatOptions};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use rand::Rng;
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lowest port picked for the public side of a mapping
const MIN_PUBLIC_PORT: u16 = 1024;

/// Source of the node's current listen addresses
pub trait TransportManager: Send + Sync {
    /// Addresses the node's transports are listening on
    fn listen_addresses(&self) -> Vec<Multiaddr>;
}

/// Sink for externally reachable addresses the node should advertise
pub trait AddressManager: Send + Sync {
    /// Register an address discovered through a gateway mapping
    fn add_observed_address(&self, addr: Multiaddr);
}

/// Opens gateway port mappings for the node's listen addresses
///
/// # Example
///
/// ```no_run
/// use natgate::{AddressManager, Multiaddr, NatManager, NatOptions, TransportManager};
/// use std::sync::Arc;
///
/// struct Listeners;
/// impl TransportManager for Listeners {
///     fn listen_addresses(&self) -> Vec<Multiaddr> {
///         vec!["/ip4/0.0.0.0/tcp/4001".parse().unwrap()]
///     }
/// }
///
/// struct Printer;
/// impl AddressManager for Printer {
///     fn add_observed_address(&self, addr: Multiaddr) {
///         println!("reachable at {}", addr);
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let options = NatOptions { enabled: true, ..Default::default() };
/// let nat = NatManager::new(&"QmNode", Arc::new(Listeners), Arc::new(Printer), options)?;
///
/// nat.start();
/// // ... node runs ...
/// nat.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct NatManager {
    inner: Arc<Inner>,
}

struct Inner {
    peer_id: String,
    transport_manager: Arc<dyn TransportManager>,
    address_manager: Arc<dyn AddressManager>,
    enabled: bool,
    external_ip: Option<IpAddr>,
    config: MappingConfig,
    retry: RetryPolicy,
    factory: PortMapperFactory,
    client: Mutex<Option<Arc<GatewayClient>>>,
    /// Bumped by every `stop`; a pass started under an older value is stale
    generation: AtomicU64,
}

impl NatManager {
    /// Create a manager that talks to the gateway over UPnP / NAT-PMP
    ///
    /// Fails with [`Error::Configuration`] if `options.ttl_secs` is below 7200.
    pub fn new(
        peer_id: &impl Display,
        transport_manager: Arc<dyn TransportManager>,
        address_manager: Arc<dyn AddressManager>,
        options: NatOptions,
    ) -> Result<Self> {
        Self::with_factory(
            peer_id,
            transport_manager,
            address_manager,
            options,
            igd_factory(),
        )
    }

    /// Create a manager whose gateway mapper is built by `factory`
    pub fn with_factory(
        peer_id: &impl Display,
        transport_manager: Arc<dyn TransportManager>,
        address_manager: Arc<dyn AddressManager>,
        options: NatOptions,
        factory: PortMapperFactory,
    ) -> Result<Self> {
        let config = MappingConfig::from_options(&options, peer_id)?;

        Ok(Self {
            inner: Arc::new(Inner {
                peer_id: peer_id.to_string(),
                transport_manager,
                address_manager,
                enabled: options.enabled,
                external_ip: options.external_ip,
                config,
                retry: options.retry,
                factory,
                client: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Whether mapping is switched on and possible on this target
    pub fn is_enabled(&self) -> bool {
        self.inner.is_active()
    }

    /// The resolved mapping configuration
    pub fn config(&self) -> &MappingConfig {
        &self.inner.config
    }

    /// Whether a gateway client currently exists
    pub async fn has_client(&self) -> bool {
        self.inner.client.lock().await.is_some()
    }

    /// Start mapping listen addresses in the background
    ///
    /// Returns immediately. The returned handle may be awaited to observe
    /// completion; dropping it detaches the task. Returns `None` when the
    /// manager is disabled or no tokio runtime is available.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.inner.is_active() {
            return None;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("NAT manager cannot start without a tokio runtime: {}", e);
                return None;
            }
        };

        let inner = self.inner.clone();
        let generation = inner.generation();
        Some(runtime.spawn(async move {
            let mapped = inner.map_addresses(generation).await;
            debug!(
                "NAT mapping pass for {} finished with {} external address(es)",
                inner.peer_id,
                mapped.len()
            );
        }))
    }

    /// Run one mapping pass over the current listen addresses
    ///
    /// Returns the external addresses handed to the address manager.
    pub async fn map_addresses(&self) -> Vec<Multiaddr> {
        if !self.inner.is_active() {
            return Vec::new();
        }
        self.inner.map_addresses(self.inner.generation()).await
    }

    /// Remove any open mappings and drop the gateway client
    ///
    /// Never fails; teardown errors are logged. A mapping pass still in flight
    /// publishes nothing further and creates no new client. A later
    /// [`start`](Self::start) creates a fresh client.
    pub async fn stop(&self) {
        if !self.inner.is_active() {
            return;
        }

        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let Some(client) = self.inner.client.lock().await.take() else {
            return;
        };

        info!("Removing NAT port mappings");
        if let Err(e) = client.destroy().await {
            error!("Failed to remove NAT port mappings: {}", e);
        }
    }
}

impl Inner {
    fn is_active(&self) -> bool {
        self.enabled && !cfg!(target_arch = "wasm32")
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    async fn map_addresses(&self, generation: u64) -> Vec<Multiaddr> {
        let mut mapped = Vec::new();

        for addr in self.transport_manager.listen_addresses() {
            if self.is_stale(generation) {
                debug!("NAT manager stopped, abandoning mapping pass");
                break;
            }
            if !is_eligible(&addr) {
                continue;
            }
            let Some(thin) = ThinWaistAddress::from_multiaddr(&addr) else {
                continue;
            };

            match self.map_address(thin, generation).await {
                Ok(observed) => mapped.push(observed),
                Err(Error::Stopped) => break,
                // hole punching errors are non-fatal
                Err(e) => error!("Failed to map {}: {}", addr, e),
            }
        }

        mapped
    }

    async fn map_address(&self, thin: ThinWaistAddress, generation: u64) -> Result<Multiaddr> {
        let client = self.client(generation).await?;

        let public_ip = match self.external_ip {
            Some(ip) => ip,
            None => client.external_ip().await?,
        };

        if detect_cgnat(public_ip) || is_private_ip(public_ip) {
            return Err(Error::PrivateExternalIp(public_ip));
        }
        if !public_ip.is_ipv4() {
            return Err(Error::InvalidAddress(format!(
                "external IP {} is not IPv4",
                public_ip
            )));
        }

        let public_port = high_port();
        let protocol: IpProtocol = thin.transport.as_str().to_uppercase().parse()?;

        info!(
            "Opening port mapping from {}:{} to {}:{}",
            public_ip, public_port, thin.host, thin.port
        );

        client
            .map(MapRequest {
                public_port,
                private_port: thin.port,
                protocol,
            })
            .await?;

        if self.is_stale(generation) {
            // stop() already tore this client down; remove the late mapping
            if let Err(e) = client.destroy().await {
                error!("Failed to remove late NAT port mapping: {}", e);
            }
            return Err(Error::Stopped);
        }

        let observed = from_node_address(public_ip, public_port, thin.transport);
        info!("Node reachable at {}", observed);
        self.address_manager.add_observed_address(observed.clone());

        Ok(observed)
    }

    async fn client(&self, generation: u64) -> Result<Arc<GatewayClient>> {
        let mut slot = self.client.lock().await;

        if self.is_stale(generation) {
            return Err(Error::Stopped);
        }

        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        debug!("Creating gateway client ({})", self.config.description);
        let mapper = (self.factory)(&self.config)?;
        let client = Arc::new(GatewayClient::new(mapper, self.retry.clone()));
        *slot = Some(client.clone());

        Ok(client)
    }
}

/// Random public port in `[1024, 65535]`
fn high_port() -> u16 {
    rand::thread_rng().gen_range(MIN_PUBLIC_PORT..=u16::MAX)
}
