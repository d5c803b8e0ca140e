use crate::config::MappingConfig;
use crate::connectivity::mapper::GatewayProtocols;
use crate::connectivity::{
    IgdPortMapper, IpProtocol, MapRequest, MappingError, MappingProtocol, PortMapper,
};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const GATEWAY: &str = "192.168.1.1";

/// Scripted UPnP / NAT-PMP gateway recording every call
#[derive(Default)]
struct FakeProtocols {
    upnp_fails: AtomicBool,
    upnp_unmap_fails: AtomicBool,
    upnp_external_ip_fails: AtomicBool,
    /// Port NAT-PMP hands out instead of the requested one
    natpmp_reassigns: Mutex<Option<u16>>,
    upnp_maps: Mutex<Vec<MapRequest>>,
    upnp_unmaps: Mutex<Vec<MapRequest>>,
    natpmp_maps: Mutex<Vec<(MapRequest, u32)>>,
}

impl FakeProtocols {
    fn upnp_maps(&self) -> usize {
        self.upnp_maps.lock().unwrap().len()
    }

    fn natpmp_maps(&self) -> Vec<(MapRequest, u32)> {
        self.natpmp_maps.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayProtocols for FakeProtocols {
    async fn upnp_map(
        &self,
        _gateway: Option<IpAddr>,
        request: MapRequest,
        _lifetime_secs: u32,
        _description: String,
    ) -> Result<(), MappingError> {
        self.upnp_maps.lock().unwrap().push(request);
        if self.upnp_fails.load(Ordering::SeqCst) {
            return Err(MappingError::NoGateway);
        }
        Ok(())
    }

    async fn upnp_unmap(
        &self,
        _gateway: Option<IpAddr>,
        request: MapRequest,
    ) -> Result<(), MappingError> {
        self.upnp_unmaps.lock().unwrap().push(request);
        if self.upnp_unmap_fails.load(Ordering::SeqCst) {
            return Err(MappingError::GatewayError("NoSuchEntryInArray".to_string()));
        }
        Ok(())
    }

    async fn upnp_external_ip(&self, _gateway: Option<IpAddr>) -> Result<IpAddr, MappingError> {
        if self.upnp_external_ip_fails.load(Ordering::SeqCst) {
            return Err(MappingError::Timeout);
        }
        Ok("203.0.113.5".parse().unwrap())
    }

    async fn natpmp_map(
        &self,
        _gateway: IpAddr,
        request: MapRequest,
        lifetime_secs: u32,
    ) -> Result<u16, MappingError> {
        self.natpmp_maps.lock().unwrap().push((request, lifetime_secs));
        match *self.natpmp_reassigns.lock().unwrap() {
            Some(port) if lifetime_secs > 0 => Ok(port),
            _ => Ok(request.public_port),
        }
    }

    async fn natpmp_external_ip(&self, _gateway: IpAddr) -> Result<IpAddr, MappingError> {
        Ok("198.51.100.9".parse().unwrap())
    }

    fn resolve_gateway(&self, configured: Option<IpAddr>) -> Result<IpAddr, MappingError> {
        Ok(configured.unwrap_or_else(|| GATEWAY.parse().unwrap()))
    }
}

fn config(enable_pmp: bool, auto_renew: bool) -> MappingConfig {
    MappingConfig {
        description: "natgate test".to_string(),
        ttl_secs: 7200,
        auto_renew,
        gateway: Some(GATEWAY.parse().unwrap()),
        enable_pmp,
    }
}

fn request(public_port: u16) -> MapRequest {
    MapRequest {
        public_port,
        private_port: 4001,
        protocol: IpProtocol::TCP,
    }
}

fn mapper(enable_pmp: bool, auto_renew: bool) -> (Arc<FakeProtocols>, IgdPortMapper) {
    let protocols = Arc::new(FakeProtocols::default());
    let mapper = IgdPortMapper::with_protocols(&config(enable_pmp, auto_renew), protocols.clone());
    (protocols, mapper)
}

#[tokio::test]
async fn test_upnp_mapping_is_recorded() {
    let (protocols, mapper) = mapper(true, false);

    assert_ok!(mapper.map(request(50123)).await);

    let open = mapper.open_mappings();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].request, request(50123));
    assert_eq!(open[0].via, MappingProtocol::UPnP);
    assert!(protocols.natpmp_maps().is_empty());
}

#[tokio::test]
async fn test_upnp_failure_without_pmp_is_an_error() {
    let (protocols, mapper) = mapper(false, false);
    protocols.upnp_fails.store(true, Ordering::SeqCst);

    assert_err!(mapper.map(request(50123)).await);

    assert!(mapper.open_mappings().is_empty());
    assert!(protocols.natpmp_maps().is_empty());
}

#[tokio::test]
async fn test_falls_back_to_natpmp() {
    let (protocols, mapper) = mapper(true, false);
    protocols.upnp_fails.store(true, Ordering::SeqCst);

    assert_ok!(mapper.map(request(50123)).await);

    let open = mapper.open_mappings();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].via, MappingProtocol::NATPMP);
    assert_eq!(protocols.natpmp_maps(), vec![(request(50123), 7200)]);
}

#[tokio::test]
async fn test_natpmp_reassigned_port_is_released_and_rejected() {
    let (protocols, mapper) = mapper(true, false);
    protocols.upnp_fails.store(true, Ordering::SeqCst);
    *protocols.natpmp_reassigns.lock().unwrap() = Some(61000);

    let result = mapper.map(request(50123)).await;

    assert!(matches!(result, Err(MappingError::GatewayError(_))));
    assert!(mapper.open_mappings().is_empty());

    let calls = protocols.natpmp_maps();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], (request(61000), 0));
}

#[tokio::test]
async fn test_destroy_keeps_failed_removals_for_next_attempt() {
    let (protocols, mapper) = mapper(true, false);
    assert_ok!(mapper.map(request(50123)).await);
    assert_ok!(mapper.map(request(50124)).await);

    protocols.upnp_unmap_fails.store(true, Ordering::SeqCst);
    assert_err!(mapper.destroy().await);
    assert_eq!(mapper.open_mappings().len(), 2);

    protocols.upnp_unmap_fails.store(false, Ordering::SeqCst);
    assert_ok!(mapper.destroy().await);
    assert!(mapper.open_mappings().is_empty());
    assert_eq!(protocols.upnp_unmaps.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_destroy_releases_natpmp_mappings_with_zero_lifetime() {
    let (protocols, mapper) = mapper(true, false);
    protocols.upnp_fails.store(true, Ordering::SeqCst);
    assert_ok!(mapper.map(request(50123)).await);

    assert_ok!(mapper.destroy().await);

    assert_eq!(protocols.natpmp_maps().last(), Some(&(request(50123), 0)));
    assert!(protocols.upnp_unmaps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_external_ip_falls_back_to_natpmp() {
    let (protocols, mapper) = mapper(true, false);
    assert_eq!(
        mapper.external_ip().await.unwrap(),
        "203.0.113.5".parse::<IpAddr>().unwrap()
    );

    protocols.upnp_external_ip_fails.store(true, Ordering::SeqCst);
    assert_eq!(
        mapper.external_ip().await.unwrap(),
        "198.51.100.9".parse::<IpAddr>().unwrap()
    );
}

#[tokio::test]
async fn test_external_ip_without_pmp_propagates_upnp_error() {
    let (protocols, mapper) = mapper(false, false);
    protocols.upnp_external_ip_fails.store(true, Ordering::SeqCst);

    assert!(matches!(mapper.external_ip().await, Err(MappingError::Timeout)));
}

// 80% of a 7200 s lease
const RENEW_EVERY: Duration = Duration::from_secs(5760);

#[tokio::test(start_paused = true)]
async fn test_renewal_stops_on_destroy() {
    let (protocols, mapper) = mapper(true, true);
    assert_ok!(mapper.map(request(50123)).await);
    assert_eq!(protocols.upnp_maps(), 1);

    tokio::time::sleep(RENEW_EVERY * 2 + Duration::from_secs(1)).await;
    assert_eq!(protocols.upnp_maps(), 3);

    assert_ok!(mapper.destroy().await);
    tokio::time::sleep(RENEW_EVERY * 3).await;
    assert_eq!(protocols.upnp_maps(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_renewal_stops_on_drop() {
    let (protocols, mapper) = mapper(true, true);
    assert_ok!(mapper.map(request(50123)).await);

    tokio::time::sleep(RENEW_EVERY + Duration::from_secs(1)).await;
    assert_eq!(protocols.upnp_maps(), 2);

    drop(mapper);
    tokio::time::sleep(RENEW_EVERY * 3).await;
    assert_eq!(protocols.upnp_maps(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_renewal_without_auto_renew() {
    let (protocols, mapper) = mapper(true, false);
    assert_ok!(mapper.map(request(50123)).await);

    tokio::time::sleep(RENEW_EVERY * 3).await;
    assert_eq!(protocols.upnp_maps(), 1);
}
