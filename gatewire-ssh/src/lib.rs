//! SSH-facing side of Gatewire.
//!
//! The secure-transport layer (key exchange, channel framing) is `russh`;
//! this crate supplies the server handler that authenticates clients against
//! the identity directory, negotiates remote forwards, and drives one
//! [`Forwarder`](gatewire_core::Forwarder) per session.

pub mod direct;
pub mod server;
pub mod transport;

pub use server::{GatewayServer, GatewayServerBuilder};
pub use transport::SshTransport;
