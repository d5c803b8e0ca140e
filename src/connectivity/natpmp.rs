//! NAT-PMP (NAT Port Mapping Protocol) client - RFC 6886
//!
//! Used as a fallback when the gateway does not answer UPnP discovery. NAT-PMP
//! uses UDP on port 5351 of the default gateway and supports external address
//! requests plus UDP/TCP mappings. A MAP request with lifetime 0 deletes the
//! mapping.

use super::types::{IpProtocol, MapRequest, MappingError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

/// NAT-PMP server port (IANA assigned)
const NATPMP_SERVER_PORT: u16 = 5351;

/// NAT-PMP protocol version
pub(crate) const NATPMP_VERSION: u8 = 0;

/// Default timeout for NAT-PMP requests
const NATPMP_TIMEOUT: Duration = Duration::from_secs(2);

/// NAT-PMP opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NatPmpOpcode {
    /// External address request
    ExternalAddress = 0,
    /// UDP port mapping
    MapUdp = 1,
    /// TCP port mapping
    MapTcp = 2,
}

/// NAT-PMP result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum NatPmpResultCode {
    Success = 0,
    UnsupportedVersion = 1,
    NotAuthorized = 2,
    NetworkFailure = 3,
    OutOfResources = 4,
    UnsupportedOpcode = 5,
}

impl NatPmpResultCode {
    pub(crate) fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::NotAuthorized),
            3 => Some(Self::NetworkFailure),
            4 => Some(Self::OutOfResources),
            5 => Some(Self::UnsupportedOpcode),
            _ => None,
        }
    }

    pub(crate) fn to_error_message(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnsupportedVersion => "Unsupported NAT-PMP version",
            Self::NotAuthorized => "Not authorized/refused",
            Self::NetworkFailure => "Network failure",
            Self::OutOfResources => "Out of resources",
            Self::UnsupportedOpcode => "Unsupported opcode",
        }
    }
}

/// Request (or with `lifetime_secs == 0`, delete) a mapping on `gateway`
///
/// Returns the external port the gateway actually assigned, which may differ
/// from the requested public port.
pub async fn natpmp_map(
    gateway: IpAddr,
    request: MapRequest,
    lifetime_secs: u32,
) -> Result<u16, MappingError> {
    info!(
        "NAT-PMP {} request to {}: {} -> {} ({}s)",
        request.protocol, gateway, request.public_port, request.private_port, lifetime_secs
    );

    let packet = build_natpmp_map_request(
        request.private_port,
        request.public_port,
        lifetime_secs,
        request.protocol,
    );

    let response = exchange(gateway, packet, 16).await?;
    let external_port = parse_natpmp_map_response(&response)?;

    debug!("NAT-PMP gateway assigned external port {}", external_port);
    Ok(external_port)
}

/// Ask `gateway` for its external IPv4 address
pub async fn natpmp_external_ip(gateway: IpAddr) -> Result<IpAddr, MappingError> {
    let packet = vec![NATPMP_VERSION, NatPmpOpcode::ExternalAddress as u8];
    let response = exchange(gateway, packet, 12).await?;
    parse_natpmp_external_address_response(&response)
}

/// Send one request and wait for one response on the blocking pool
async fn exchange(
    gateway: IpAddr,
    packet: Vec<u8>,
    response_len: usize,
) -> Result<Vec<u8>, MappingError> {
    tokio::task::spawn_blocking(move || {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(NATPMP_TIMEOUT))?;
        socket.set_write_timeout(Some(NATPMP_TIMEOUT))?;

        let server_addr = SocketAddr::new(gateway, NATPMP_SERVER_PORT);
        socket.send_to(&packet, server_addr)?;

        let mut buf = vec![0u8; response_len];
        let (received, _) = socket.recv_from(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => MappingError::Timeout,
            _ => MappingError::Io(e),
        })?;

        buf.truncate(received);
        Ok(buf)
    })
    .await
    .map_err(|e| MappingError::Internal(format!("Task join error: {}", e)))?
}

/// Build a NAT-PMP MAP request packet
pub(crate) fn build_natpmp_map_request(
    internal_port: u16,
    suggested_external_port: u16,
    lifetime_secs: u32,
    protocol: IpProtocol,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(12);

    request.push(NATPMP_VERSION);

    let opcode = match protocol {
        IpProtocol::UDP => NatPmpOpcode::MapUdp,
        IpProtocol::TCP => NatPmpOpcode::MapTcp,
    };
    request.push(opcode as u8);

    // Reserved, must be zero
    request.extend_from_slice(&[0u8; 2]);

    request.extend_from_slice(&internal_port.to_be_bytes());
    request.extend_from_slice(&suggested_external_port.to_be_bytes());
    request.extend_from_slice(&lifetime_secs.to_be_bytes());

    request
}

/// Check version, response opcode and result code shared by all responses
fn check_response_header(response: &[u8], expected_opcode: u8) -> Result<(), MappingError> {
    let version = response[0];
    if version != NATPMP_VERSION {
        return Err(MappingError::InvalidResponse(format!(
            "Invalid version: {} (expected {})",
            version, NATPMP_VERSION
        )));
    }

    let opcode = response[1];
    if opcode != 128 + expected_opcode {
        return Err(MappingError::InvalidResponse(format!(
            "Unexpected opcode: {} (expected {})",
            opcode,
            128 + expected_opcode
        )));
    }

    let result_code = u16::from_be_bytes([response[2], response[3]]);
    let result = NatPmpResultCode::from_u16(result_code).ok_or_else(|| {
        MappingError::InvalidResponse(format!("Unknown result code: {}", result_code))
    })?;

    if result != NatPmpResultCode::Success {
        return Err(MappingError::GatewayError(
            result.to_error_message().to_string(),
        ));
    }

    Ok(())
}

/// Parse a NAT-PMP MAP response, returning the assigned external port
///
/// Layout: version, opcode (128 + 1|2), result code (2), seconds since epoch
/// (4), internal port (2), external port (2), lifetime (4).
pub(crate) fn parse_natpmp_map_response(response: &[u8]) -> Result<u16, MappingError> {
    if response.len() < 16 {
        return Err(MappingError::InvalidResponse(format!(
            "Response too short: {} bytes (expected 16)",
            response.len()
        )));
    }

    let request_opcode = response[1].wrapping_sub(128);
    if request_opcode != NatPmpOpcode::MapUdp as u8 && request_opcode != NatPmpOpcode::MapTcp as u8 {
        return Err(MappingError::InvalidResponse(format!(
            "Not a MAP response: opcode {}",
            response[1]
        )));
    }
    check_response_header(response, request_opcode)?;

    Ok(u16::from_be_bytes([response[10], response[11]]))
}

/// Parse a NAT-PMP external address response
///
/// Layout: version, opcode 128, result code (2), seconds since epoch (4),
/// external IPv4 (4).
pub(crate) fn parse_natpmp_external_address_response(
    response: &[u8],
) -> Result<IpAddr, MappingError> {
    if response.len() < 12 {
        return Err(MappingError::InvalidResponse(format!(
            "External IP response too short: {} bytes",
            response.len()
        )));
    }

    check_response_header(response, NatPmpOpcode::ExternalAddress as u8)?;

    Ok(IpAddr::V4(Ipv4Addr::new(
        response[8],
        response[9],
        response[10],
        response[11],
    )))
}
