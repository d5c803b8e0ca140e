//! Natgate - NAT traversal for peer-to-peer nodes
//!
//! This library makes a node reachable from the public internet when it sits
//! behind a home gateway. It picks the node's bare TCP/IPv4 listen addresses,
//! asks the gateway for inbound port mappings (UPnP IGD, optionally NAT-PMP),
//! and hands the resulting external addresses to the node's address manager.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod config;
pub mod connectivity;
pub mod retry;

pub use address::{AddressFamily, Multiaddr, Protocol, ThinWaistAddress, Transport};
pub use config::{MappingConfig, NatOptions, PmpOptions, DEFAULT_TTL_SECS};
pub use connectivity::{AddressManager, NatManager, TransportManager};

use std::net::IpAddr;

/// Result type alias for Natgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Natgate operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid construction input (e.g. a TTL below the minimum)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The gateway reported an external IP that is itself non-routable
    #[error(
        "{0} is private - please set nat.external_ip to an externally routable IP \
         or ensure you are not behind a double NAT"
    )]
    PrivateExternalIp(IpAddr),

    /// Gateway operation failed after all retries
    #[error("Mapping error: {0}")]
    Mapping(#[from] connectivity::MappingError),

    /// Address cannot be published as an external address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The manager was stopped while a mapping pass was still running
    #[error("NAT manager stopped")]
    Stopped,

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Initialize the Natgate library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
