//! Transport seam between the forwarder and the secure session layer.
//!
//! The gateway never frames or encrypts traffic itself; the SSH crate behind
//! this trait does. Keeping the seam here lets tests drive a forwarder with
//! an in-memory transport.

use async_trait::async_trait;
use gatewire_common::Result;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::forward::BindTarget;

pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelStream for T {}

pub type BoxedStream = Pin<Box<dyn TunnelStream>>;

/// One authenticated client transport session, as the forwarder sees it.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a back-channel into the client for one public connection.
    ///
    /// `dest` is the negotiated bind target the client asked to receive
    /// traffic on; `origin` is the public peer the bytes come from.
    async fn open_backchannel(&self, dest: &BindTarget, origin: SocketAddr)
        -> Result<BoxedStream>;

    /// Probe the session for liveness. An error counts as one missed probe.
    async fn keepalive(&self) -> Result<()>;

    /// Signal session termination to the client side.
    async fn close(&self);
}
