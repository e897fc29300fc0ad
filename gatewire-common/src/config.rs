//! Configuration types shared across the gateway crates.

use crate::constants;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Per-session tuning: liveness probing and inbound queue depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between liveness probes.
    pub keepalive_interval: Duration,
    /// Consecutive probe failures tolerated before forced teardown.
    pub keepalive_max_failures: u32,
    /// Depth of the inbound connection queue fed by the facade.
    pub inbound_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: constants::KEEPALIVE_INTERVAL,
            keepalive_max_failures: constants::KEEPALIVE_MAX_FAILURES,
            inbound_queue_depth: constants::INBOUND_QUEUE_DEPTH,
        }
    }
}

/// Public facade limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeConfig {
    /// Maximum bytes of a request's header block read during routing.
    pub max_header_block: usize,
    /// Deadline for a connection to produce its header block.
    pub header_timeout: Duration,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            max_header_block: constants::MAX_HEADER_BLOCK,
            header_timeout: constants::HEADER_PEEK_TIMEOUT,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// SSH session listener address.
    pub ssh_bind: SocketAddr,
    /// Public facade listener address.
    pub facade_bind: SocketAddr,
    /// Domain suffix appended to access ids to form public hosts.
    pub domain: String,
    /// Reserved direct-connect port routed to the diagnostic sink.
    pub diagnostic_port: u16,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub facade: FacadeConfig,
}

impl GatewayConfig {
    /// Config with the standard ports for `domain`.
    pub fn for_domain(domain: impl Into<String>) -> crate::Result<Self> {
        Ok(Self {
            ssh_bind: constants::DEFAULT_SSH_BIND
                .parse()
                .map_err(|e| crate::GatewayError::Config(format!("ssh bind: {e}")))?,
            facade_bind: constants::DEFAULT_FACADE_BIND
                .parse()
                .map_err(|e| crate::GatewayError::Config(format!("facade bind: {e}")))?,
            domain: domain.into(),
            diagnostic_port: constants::DEFAULT_DIAGNOSTIC_PORT,
            session: SessionConfig::default(),
            facade: FacadeConfig::default(),
        })
    }

    /// Public host name for an access id under this gateway's domain.
    pub fn public_host(&self, access_id: &str) -> String {
        format!("{access_id}.{}", self.domain)
    }
}
