//! `SessionTransport` backed by a live russh server handle.

use async_trait::async_trait;
use gatewire_common::{GatewayError, Result};
use gatewire_core::forward::BindTarget;
use gatewire_core::transport::{BoxedStream, SessionTransport};
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Shared slot holding the client's session channel, once it opened one.
pub type SessionChannelSlot = Arc<Mutex<Option<ChannelId>>>;

/// Bridge from the forwarder to one SSH connection.
pub struct SshTransport {
    handle: Handle,
    session_channel: SessionChannelSlot,
}

impl SshTransport {
    pub fn new(handle: Handle, session_channel: SessionChannelSlot) -> Self {
        Self {
            handle,
            session_channel,
        }
    }

    fn channel_id(&self) -> Option<ChannelId> {
        match self.session_channel.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SessionTransport for SshTransport {
    /// Open a `forwarded-tcpip` channel into the client, carrying the
    /// negotiated bind target and the public origin address.
    async fn open_backchannel(
        &self,
        dest: &BindTarget,
        origin: SocketAddr,
    ) -> Result<BoxedStream> {
        let channel = self
            .handle
            .channel_open_forwarded_tcpip(
                dest.addr.clone(),
                dest.port,
                origin.ip().to_string(),
                u32::from(origin.port()),
            )
            .await
            .map_err(|e| GatewayError::ChannelOpen(e.to_string()))?;
        Ok(Box::pin(channel.into_stream()))
    }

    /// Zero-length data write on the client's session channel. Fails when
    /// the connection's event loop is gone, which is the liveness signal
    /// the forwarder counts. The probe carries no want-reply
    /// acknowledgment, so a half-open TCP peer that still accepts writes
    /// is only caught later, by the transport inactivity timeout.
    async fn keepalive(&self) -> Result<()> {
        let Some(id) = self.channel_id() else {
            // No session channel yet; nothing to probe.
            return Ok(());
        };
        self.handle
            .data(id, CryptoVec::from_slice(b""))
            .await
            .map_err(|_| GatewayError::Transport("keepalive send failed".into()))
    }

    /// Close the session channel so the client sees a clean end of session.
    async fn close(&self) {
        if let Some(id) = self.channel_id() {
            let _ = self.handle.eof(id).await;
            let _ = self.handle.close(id).await;
        }
    }
}

/// Best-effort status line to the client's session channel.
pub(crate) async fn send_text(handle: &Handle, channel: ChannelId, text: &str) {
    let _ = handle.data(channel, CryptoVec::from_slice(text.as_bytes())).await;
}
