//! UPnP IGD (Internet Gateway Device) client
//!
//! Discovery uses SSDP; the mapping calls are SOAP requests to the gateway's
//! control URL. `igd-next` exposes blocking I/O, so every call runs on the
//! blocking pool.

use super::types::{IpProtocol, MapRequest, MappingError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for UPnP operations
const UPNP_TIMEOUT: Duration = Duration::from_secs(5);

/// SSDP port a gateway answers discovery on
const SSDP_PORT: u16 = 1900;

/// Get local IP address for UPnP gateway communication
///
/// No data is sent; connecting a UDP socket only selects the outbound
/// interface.
fn get_local_ip_for_gateway() -> Result<Ipv4Addr, MappingError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| MappingError::Internal(format!("Failed to create socket: {}", e)))?;

    socket
        .connect("8.8.8.8:80")
        .map_err(|e| MappingError::Internal(format!("Failed to connect: {}", e)))?;

    let local_addr = socket
        .local_addr()
        .map_err(|e| MappingError::Internal(format!("Failed to get local address: {}", e)))?;

    match local_addr.ip() {
        IpAddr::V4(ipv4) => Ok(ipv4),
        IpAddr::V6(_) => Err(MappingError::Internal(
            "UPnP requires IPv4 address".to_string(),
        )),
    }
}

/// Search for the IGD, unicasting the SSDP search to `gateway` when configured
fn search_gateway(gateway: Option<IpAddr>) -> Result<igd_next::Gateway, MappingError> {
    debug!("Searching for UPnP IGD gateway...");

    let mut options = igd_next::SearchOptions {
        timeout: Some(UPNP_TIMEOUT),
        ..Default::default()
    };
    if let Some(gateway) = gateway {
        options.broadcast_address = SocketAddr::new(gateway, SSDP_PORT);
    }

    igd_next::search_gateway(options).map_err(|e| {
        debug!("UPnP gateway search failed: {}", e);
        MappingError::NoGateway
    })
}

fn to_igd_protocol(protocol: IpProtocol) -> igd_next::PortMappingProtocol {
    match protocol {
        IpProtocol::TCP => igd_next::PortMappingProtocol::TCP,
        IpProtocol::UDP => igd_next::PortMappingProtocol::UDP,
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, MappingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MappingError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MappingError::Internal(format!("Task join error: {}", e)))?
}

/// Add a port mapping through UPnP AddPortMapping
pub async fn upnp_map(
    gateway: Option<IpAddr>,
    request: MapRequest,
    lifetime_secs: u32,
    description: String,
) -> Result<(), MappingError> {
    run_blocking(move || {
        let igd = search_gateway(gateway)?;
        let local_ip = get_local_ip_for_gateway()?;
        let local_addr = SocketAddr::new(IpAddr::V4(local_ip), request.private_port);

        debug!(
            "Adding UPnP port mapping: {} -> {} ({}s)",
            request.public_port, local_addr, lifetime_secs
        );

        igd.add_port(
            to_igd_protocol(request.protocol),
            request.public_port,
            local_addr,
            lifetime_secs,
            &description,
        )
        .map_err(|e| {
            warn!("UPnP AddPortMapping failed: {}", e);
            MappingError::GatewayError(format!("AddPortMapping failed: {}", e))
        })?;

        info!(
            "UPnP mapping open: {} {} -> {}",
            request.protocol, request.public_port, local_addr
        );
        Ok(())
    })
    .await
}

/// Query the gateway's WAN address through UPnP GetExternalIPAddress
pub async fn upnp_external_ip(gateway: Option<IpAddr>) -> Result<IpAddr, MappingError> {
    run_blocking(move || {
        let igd = search_gateway(gateway)?;
        igd.get_external_ip()
            .map_err(|e| MappingError::GatewayError(format!("GetExternalIPAddress failed: {}", e)))
    })
    .await
}

/// Delete a port mapping through UPnP DeletePortMapping
pub async fn upnp_unmap(gateway: Option<IpAddr>, request: MapRequest) -> Result<(), MappingError> {
    run_blocking(move || {
        let igd = search_gateway(gateway)?;
        igd.remove_port(to_igd_protocol(request.protocol), request.public_port)
            .map_err(|e| MappingError::GatewayError(format!("DeletePortMapping failed: {}", e)))?;

        info!(
            "UPnP mapping removed: {} {}",
            request.protocol, request.public_port
        );
        Ok(())
    })
    .await
}
