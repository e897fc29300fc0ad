//! Common utilities and types for Gatewire

pub mod config;
pub mod constants;
pub mod error;

pub use config::{FacadeConfig, GatewayConfig, SessionConfig};
pub use constants::{
    DEFAULT_DIAGNOSTIC_PORT, DEFAULT_FACADE_BIND, DEFAULT_SSH_BIND, KEEPALIVE_MAX_FAILURES,
};
pub use error::{GatewayError, Result};
