//! Gateway address resolution
//!
//! NAT-PMP talks to the default gateway directly, so its address comes either
//! from configuration or from the OS routing table.

use super::types::MappingError;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Use the configured gateway, or discover the default route's gateway
pub fn resolve_gateway(configured: Option<IpAddr>) -> Result<IpAddr, MappingError> {
    match configured {
        Some(gateway) => {
            debug!("Using configured gateway {}", gateway);
            Ok(gateway)
        }
        None => find_default_gateway(),
    }
}

/// Find the default gateway IP address
///
/// On Linux this reads `/proc/net/route`; on macOS and Windows it asks the
/// platform routing tool.
pub fn find_default_gateway() -> Result<IpAddr, MappingError> {
    #[cfg(target_os = "linux")]
    {
        let route_table = std::fs::read_to_string("/proc/net/route")
            .map_err(|e| MappingError::Internal(format!("Failed to read route table: {}", e)))?;
        parse_linux_route_table(&route_table)
            .map(IpAddr::V4)
            .ok_or(MappingError::NoGateway)
    }

    #[cfg(target_os = "macos")]
    {
        let stdout = run_route_tool("netstat", &["-rn", "-f", "inet"])?;
        stdout
            .lines()
            .filter(|line| line.starts_with("default"))
            .find_map(|line| line.split_whitespace().nth(1)?.parse::<Ipv4Addr>().ok())
            .map(IpAddr::V4)
            .ok_or(MappingError::NoGateway)
    }

    #[cfg(target_os = "windows")]
    {
        let stdout = run_route_tool("route", &["print", "0.0.0.0"])?;
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("0.0.0.0"))
            .find_map(|line| line.split_whitespace().nth(2)?.parse::<Ipv4Addr>().ok())
            .map(IpAddr::V4)
            .ok_or(MappingError::NoGateway)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(MappingError::NotSupported)
    }
}

/// Extract the default route's gateway from `/proc/net/route` contents
///
/// Destination and gateway are little-endian hex; the default route has
/// destination `00000000`.
pub(crate) fn parse_linux_route_table(route_table: &str) -> Option<Ipv4Addr> {
    route_table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        let gateway = u32::from_str_radix(fields[2], 16).ok()?;
        Some(Ipv4Addr::from(gateway.swap_bytes()))
    })
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn run_route_tool(program: &str, args: &[&str]) -> Result<String, MappingError> {
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .map_err(|e| MappingError::Internal(format!("Failed to run {}: {}", program, e)))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
