//! Thin-waist view of listen addresses
//!
//! Listen addresses are [`Multiaddr`]s such as `/ip4/0.0.0.0/tcp/4001`. Only
//! addresses made of exactly one IP component followed by one TCP/UDP port
//! are "thin waist" addresses, which are the only ones a gateway can forward.

pub use multiaddr::{Multiaddr, Protocol};

use std::fmt;
use std::net::IpAddr;

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

/// Transport protocol of a thin-waist address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Transport {
    /// Lowercase protocol name (`tcp` / `udp`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decomposed view of a bare `host + port + transport` address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThinWaistAddress {
    /// Address family of `host`
    pub family: AddressFamily,
    /// Host IP
    pub host: IpAddr,
    /// Port number
    pub port: u16,
    /// Transport protocol
    pub transport: Transport,
}

impl ThinWaistAddress {
    /// Decompose `addr` if it is exactly `[ip4|ip6, tcp|udp]`
    pub fn from_multiaddr(addr: &Multiaddr) -> Option<Self> {
        let mut components = addr.iter();
        let host = components.next()?;
        let port = components.next()?;
        if components.next().is_some() {
            return None;
        }

        let (family, host) = match host {
            Protocol::Ip4(ip) => (AddressFamily::Ipv4, IpAddr::V4(ip)),
            Protocol::Ip6(ip) => (AddressFamily::Ipv6, IpAddr::V6(ip)),
            _ => return None,
        };

        let (transport, port) = match port {
            Protocol::Tcp(p) => (Transport::Tcp, p),
            Protocol::Udp(p) => (Transport::Udp, p),
            _ => return None,
        };

        Some(Self {
            family,
            host,
            port,
            transport,
        })
    }
}

/// Whether `addr` is exactly one IP host followed by one TCP/UDP port
pub fn is_thin_waist(addr: &Multiaddr) -> bool {
    ThinWaistAddress::from_multiaddr(addr).is_some()
}

/// Whether the host component of `addr` is a loopback IP
pub fn is_loopback(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => ip.is_loopback(),
        Some(Protocol::Ip6(ip)) => ip.is_loopback(),
        _ => false,
    }
}

/// Build a bare `ip/transport/port` address
pub fn from_node_address(ip: IpAddr, port: u16, transport: Transport) -> Multiaddr {
    let port = match transport {
        Transport::Tcp => Protocol::Tcp(port),
        Transport::Udp => Protocol::Udp(port),
    };
    Multiaddr::from(ip).with(port)
}
