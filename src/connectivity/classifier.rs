//! Candidate address selection and routability checks
//!
//! Only bare TCP/IPv4 addresses that are not loopback get a gateway mapping.
//! IPv6 listeners are never mapped.

use crate::address::{self, AddressFamily, Multiaddr, ThinWaistAddress, Transport};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// CGNAT (RFC 6598) IP range: 100.64.0.0/10
const CGNAT_RANGE_START: u32 = 0x64400000; // 100.64.0.0
const CGNAT_RANGE_END: u32 = 0x647FFFFF; // 100.127.255.255

/// Decide whether a listen address should get a gateway port mapping
///
/// # Example
///
/// ```
/// use natgate::Multiaddr;
/// use natgate::connectivity::is_eligible;
///
/// let addr: Multiaddr = "/ip4/0.0.0.0/tcp/4001".parse().unwrap();
/// assert!(is_eligible(&addr));
///
/// let ws: Multiaddr = "/ip4/0.0.0.0/tcp/4002/ws".parse().unwrap();
/// assert!(!is_eligible(&ws));
/// ```
pub fn is_eligible(addr: &Multiaddr) -> bool {
    let Some(thin) = ThinWaistAddress::from_multiaddr(addr) else {
        debug!("Skipping {}: not a bare host/port address", addr);
        return false;
    };

    if thin.transport != Transport::Tcp {
        debug!("Skipping {}: only tcp is mapped", addr);
        return false;
    }

    if address::is_loopback(addr) {
        debug!("Skipping {}: loopback", addr);
        return false;
    }

    if thin.family != AddressFamily::Ipv4 {
        debug!("Skipping {}: ipv6 is not mapped", addr);
        return false;
    }

    true
}

/// Detect if an external IP address is within CGNAT range
pub fn detect_cgnat(external_ip: IpAddr) -> bool {
    match external_ip {
        IpAddr::V4(ipv4) => {
            let is_cgnat = in_cgnat_range(ipv4);

            if is_cgnat {
                warn!(
                    "CGNAT detected: External IP {} is in range 100.64.0.0/10. \
                     A single gateway mapping will not make this node reachable.",
                    ipv4
                );
            }

            is_cgnat
        }
        IpAddr::V6(_) => false,
    }
}

fn in_cgnat_range(ipv4: Ipv4Addr) -> bool {
    (CGNAT_RANGE_START..=CGNAT_RANGE_END).contains(&u32::from(ipv4))
}

/// Check if an IP is not routable on the public internet
///
/// Covers RFC 1918, loopback, link-local, unspecified, CGNAT shared space and
/// the IANA special-purpose blocks that never appear as a gateway's WAN
/// address. Documentation ranges such as 203.0.113.0/24 count as routable.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_ipv4_private(ipv4) || in_cgnat_range(ipv4),
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback() || ipv6.is_unspecified() || is_ipv6_private(&ipv6)
        }
    }
}

fn is_ipv4_private(ipv4: Ipv4Addr) -> bool {
    let octets = ipv4.octets();

    ipv4.is_private()
        || ipv4.is_loopback()
        || ipv4.is_link_local()
        || ipv4.is_unspecified()
        || ipv4.is_broadcast()
        || ipv4.is_multicast()
        // "this network" 0.0.0.0/8
        || octets[0] == 0
        // IETF protocol assignments 192.0.0.0/24
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // benchmarking 198.18.0.0/15
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // reserved 240.0.0.0/4
        || octets[0] >= 240
}

/// Check if an IPv6 address is private
fn is_ipv6_private(ipv6: &Ipv6Addr) -> bool {
    let segments = ipv6.segments();
    // ULA (Unique Local Address): fc00::/7
    (segments[0] & 0xfe00) == 0xfc00 ||
    // Link-local: fe80::/10
    (segments[0] & 0xffc0) == 0xfe80
}
