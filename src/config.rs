//! NAT manager options and the validated mapping configuration

use crate::retry::RetryPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::IpAddr;

/// Minimum (and default) lifetime of a port mapping in seconds
pub const DEFAULT_TTL_SECS: u32 = 7200;

/// NAT-PMP options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmpOptions {
    /// Try NAT-PMP when UPnP is unavailable
    pub enabled: bool,
}

/// User-facing NAT options
///
/// Options are stored in JSON format; every field is optional in the file.
///
/// # Example
/// ```rust,no_run
/// use natgate::NatOptions;
///
/// // Load options (returns default if file doesn't exist)
/// let options = NatOptions::load("nat.json").expect("Failed to load");
/// println!("NAT enabled: {}", options.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatOptions {
    /// Master switch; when false every manager operation is a no-op
    pub enabled: bool,
    /// Fixed external IP, skipping the gateway query
    pub external_ip: Option<IpAddr>,
    /// Gateway-visible label for the mappings
    pub description: Option<String>,
    /// Requested mapping lifetime in seconds (minimum 7200)
    pub ttl_secs: Option<u32>,
    /// Refresh mappings before their TTL runs out
    pub keep_alive: bool,
    /// Explicit gateway address, skipping discovery
    pub gateway: Option<IpAddr>,
    /// NAT-PMP fallback options
    pub pmp: PmpOptions,
    /// Backoff for gateway operations
    pub retry: RetryPolicy,
}

impl Default for NatOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            external_ip: None,
            description: None,
            ttl_secs: None,
            keep_alive: true,
            gateway: None,
            pmp: PmpOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl NatOptions {
    /// Load options from a JSON file
    ///
    /// A missing or empty file yields the default options.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_json::from_str(&data)?)
    }

    /// Save options to a JSON file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Validated configuration used to drive the gateway capability
#[derive(Debug, Clone, PartialEq)]
pub struct MappingConfig {
    /// Gateway-visible mapping label
    pub description: String,
    /// Mapping lifetime in seconds, never below [`DEFAULT_TTL_SECS`]
    pub ttl_secs: u32,
    /// Refresh mappings near expiry
    pub auto_renew: bool,
    /// Gateway override
    pub gateway: Option<IpAddr>,
    /// Fall back to NAT-PMP
    pub enable_pmp: bool,
}

impl MappingConfig {
    /// Resolve options into a configuration for the given node identity
    pub fn from_options(options: &NatOptions, peer_id: &impl Display) -> Result<Self> {
        let ttl_secs = options.ttl_secs.unwrap_or(DEFAULT_TTL_SECS);

        if ttl_secs < DEFAULT_TTL_SECS {
            return Err(Error::Configuration(format!(
                "NatManager ttl should be at least {} seconds (got {})",
                DEFAULT_TTL_SECS, ttl_secs
            )));
        }

        let description = options.description.clone().unwrap_or_else(|| {
            format!(
                "{}@{} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                peer_id
            )
        });

        Ok(Self {
            description,
            ttl_secs,
            auto_renew: options.keep_alive,
            gateway: options.gateway,
            enable_pmp: options.pmp.enabled,
        })
    }
}
