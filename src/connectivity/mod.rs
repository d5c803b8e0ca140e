//! Connectivity module for NAT traversal and port mapping
//!
//! This module opens inbound port mappings on the local gateway:
//! - UPnP IGD (Universal Plug and Play) as the primary protocol
//! - NAT-PMP (NAT Port Mapping Protocol) - RFC 6886 as a fallback
//!
//! [`NatManager`] selects the listen addresses worth mapping, drives the
//! retrying [`GatewayClient`] and publishes the resulting external addresses.

// Submodules
pub mod classifier;
pub mod client;
pub mod gateway;
pub mod manager;
pub mod mapper;
pub mod natpmp;
pub mod types;
pub mod upnp;

// Re-export commonly used types
pub use types::{IpProtocol, MapRequest, MappingError, MappingProtocol, OpenMapping};

// Re-export main functions
pub use classifier::{detect_cgnat, is_eligible, is_private_ip};
pub use gateway::{find_default_gateway, resolve_gateway};
pub use natpmp::{natpmp_external_ip, natpmp_map};
pub use upnp::{upnp_external_ip, upnp_map, upnp_unmap};

// Re-export managers
pub use client::GatewayClient;
pub use manager::{AddressManager, NatManager, TransportManager};
pub use mapper::{igd_factory, IgdPortMapper, PortMapper, PortMapperFactory};
