// Fakes for the NAT manager's collaborators

use crate::address::Multiaddr;
use crate::config::{MappingConfig, NatOptions};
use crate::connectivity::{
    AddressManager, MapRequest, MappingError, NatManager, PortMapper, PortMapperFactory,
    TransportManager,
};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct FakeTransport {
    addrs: Vec<Multiaddr>,
    pub calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new(addrs: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            addrs: addrs.iter().map(|a| a.parse().unwrap()).collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl TransportManager for FakeTransport {
    fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.addrs.clone()
    }
}

#[derive(Default)]
pub struct FakeAddressBook {
    observed: Mutex<Vec<Multiaddr>>,
}

impl FakeAddressBook {
    pub fn observed(&self) -> Vec<String> {
        self.observed
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.to_string())
            .collect()
    }
}

impl AddressManager for FakeAddressBook {
    fn add_observed_address(&self, addr: Multiaddr) {
        self.observed.lock().unwrap().push(addr);
    }
}

/// Scripted gateway shared between the test and every mapper the factory builds
pub struct FakeGateway {
    pub external_ip: Mutex<IpAddr>,
    /// Remaining `map` calls that fail before one succeeds
    pub map_failures: AtomicU32,
    /// Fail `map` for this private port on every attempt
    pub failing_private_port: Mutex<Option<u16>>,
    pub external_ip_fails: AtomicBool,
    pub destroy_fails: AtomicBool,
    pub map_calls: Mutex<Vec<MapRequest>>,
    pub external_ip_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub mappers_created: AtomicUsize,
    pub configs_seen: Mutex<Vec<MappingConfig>>,
}

impl FakeGateway {
    pub fn new(external_ip: &str) -> Arc<Self> {
        Arc::new(Self {
            external_ip: Mutex::new(external_ip.parse().unwrap()),
            map_failures: AtomicU32::new(0),
            failing_private_port: Mutex::new(None),
            external_ip_fails: AtomicBool::new(false),
            destroy_fails: AtomicBool::new(false),
            map_calls: Mutex::new(Vec::new()),
            external_ip_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            mappers_created: AtomicUsize::new(0),
            configs_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn factory(self: &Arc<Self>) -> PortMapperFactory {
        let gateway = self.clone();
        Arc::new(move |config: &MappingConfig| {
            gateway.mappers_created.fetch_add(1, Ordering::SeqCst);
            gateway.configs_seen.lock().unwrap().push(config.clone());
            let mapper: Box<dyn PortMapper> = Box::new(FakeMapper {
                gateway: gateway.clone(),
            });
            Ok(mapper)
        })
    }

    pub fn map_calls(&self) -> Vec<MapRequest> {
        self.map_calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.map_calls.lock().unwrap().len()
            + self.external_ip_calls.load(Ordering::SeqCst)
            + self.destroy_calls.load(Ordering::SeqCst)
            + self.mappers_created.load(Ordering::SeqCst)
    }
}

struct FakeMapper {
    gateway: Arc<FakeGateway>,
}

#[async_trait]
impl PortMapper for FakeMapper {
    async fn map(&self, request: MapRequest) -> Result<(), MappingError> {
        self.gateway.map_calls.lock().unwrap().push(request);

        if *self.gateway.failing_private_port.lock().unwrap() == Some(request.private_port) {
            return Err(MappingError::GatewayError("ConflictInMappingEntry".to_string()));
        }

        let remaining = self.gateway.map_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.gateway.map_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MappingError::Timeout);
        }

        Ok(())
    }

    async fn destroy(&self) -> Result<(), MappingError> {
        self.gateway.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.gateway.destroy_fails.load(Ordering::SeqCst) {
            return Err(MappingError::NoGateway);
        }
        Ok(())
    }

    async fn external_ip(&self) -> Result<IpAddr, MappingError> {
        self.gateway.external_ip_calls.fetch_add(1, Ordering::SeqCst);
        if self.gateway.external_ip_fails.load(Ordering::SeqCst) {
            return Err(MappingError::NoGateway);
        }
        Ok(*self.gateway.external_ip.lock().unwrap())
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        factor: 2.0,
    }
}

pub fn enabled_options() -> NatOptions {
    NatOptions {
        enabled: true,
        retry: fast_retry(3),
        ..Default::default()
    }
}

pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub book: Arc<FakeAddressBook>,
    pub gateway: Arc<FakeGateway>,
    pub nat: NatManager,
}

pub fn harness(addrs: &[&str], external_ip: &str, options: NatOptions) -> Harness {
    let transport = FakeTransport::new(addrs);
    let book = Arc::new(FakeAddressBook::default());
    let gateway = FakeGateway::new(external_ip);

    let nat = NatManager::with_factory(
        &"QmTestPeer",
        transport.clone(),
        book.clone(),
        options,
        gateway.factory(),
    )
    .unwrap();

    Harness {
        transport,
        book,
        gateway,
        nat,
    }
}
