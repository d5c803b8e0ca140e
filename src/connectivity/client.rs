//! Retrying gateway client

use super::mapper::PortMapper;
use super::types::{MapRequest, MappingError};
use crate::retry::{retry, RetryPolicy};
use std::net::IpAddr;

/// A [`PortMapper`] whose every operation is retried with backoff
///
/// Each failed attempt is logged; once the policy is exhausted the last error
/// is returned to the caller.
pub struct GatewayClient {
    mapper: Box<dyn PortMapper>,
    policy: RetryPolicy,
}

impl GatewayClient {
    /// Wrap a mapper with the given retry policy
    pub fn new(mapper: Box<dyn PortMapper>, policy: RetryPolicy) -> Self {
        Self { mapper, policy }
    }

    /// Request a port mapping
    pub async fn map(&self, request: MapRequest) -> Result<(), MappingError> {
        retry(&self.policy, "map", || self.mapper.map(request)).await
    }

    /// Remove all mappings opened through this client
    pub async fn destroy(&self) -> Result<(), MappingError> {
        retry(&self.policy, "destroy", || self.mapper.destroy()).await
    }

    /// Query the gateway's external IP
    pub async fn external_ip(&self) -> Result<IpAddr, MappingError> {
        retry(&self.policy, "external_ip", || self.mapper.external_ip()).await
    }
}
