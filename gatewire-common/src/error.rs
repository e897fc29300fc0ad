//! Error types for Gatewire

use thiserror::Error;

/// Main error type for gateway operations.
///
/// The taxonomy mirrors how failures are scoped at runtime: protocol and
/// channel errors stay inside the task that hit them, authentication errors
/// refuse a handshake, and only listener bind failures are process-fatal.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed control payload or request framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Credential could not be resolved and no anonymous path applies
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Routing key has no live session
    #[error("Tunnel '{0}' not found")]
    TunnelNotFound(String),

    /// Access id generation exhausted its retry budget
    #[error("Could not allocate a free access id after {0} attempts")]
    AccessIdExhausted(usize),

    /// Back-channel open into the client failed
    #[error("Channel open failed: {0}")]
    ChannelOpen(String),

    /// Direct-connect destination refused by policy
    #[error("Relay denied: {0}")]
    RelayDenied(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying transport session failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;
