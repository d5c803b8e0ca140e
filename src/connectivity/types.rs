//! Common types for connectivity module

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocols available for port mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MappingProtocol {
    /// NAT Port Mapping Protocol (RFC 6886)
    NATPMP,
    /// Universal Plug and Play
    UPnP,
}

/// Errors that can occur during port mapping
#[derive(Debug, Error)]
pub enum MappingError {
    /// Network timeout waiting for response
    #[error("Mapping request timed out")]
    Timeout,

    /// Invalid response from gateway
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Gateway returned an error
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// No gateway found on network
    #[error("No gateway found")]
    NoGateway,

    /// IO error during communication
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol not supported by gateway
    #[error("Protocol not supported")]
    NotSupported,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    /// TCP protocol
    TCP = 6,
    /// UDP protocol
    UDP = 17,
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TCP => f.write_str("TCP"),
            Self::UDP => f.write_str("UDP"),
        }
    }
}

impl FromStr for IpProtocol {
    type Err = MappingError;

    /// Parses the uppercase gateway protocol name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" => Ok(Self::TCP),
            "UDP" => Ok(Self::UDP),
            other => Err(MappingError::Internal(format!(
                "Unsupported mapping protocol: {}",
                other
            ))),
        }
    }
}

/// A single port mapping request sent to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Port opened on the gateway's external interface
    pub public_port: u16,
    /// Port the node listens on
    pub private_port: u16,
    /// Transport to forward
    pub protocol: IpProtocol,
}

/// A mapping the gateway accepted and that must be removed on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMapping {
    /// The accepted request
    pub request: MapRequest,
    /// Which control protocol opened it
    pub via: MappingProtocol,
}
