#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for Gatewire.
//!
//! These drive the facade and the session engine end to end over a mock
//! transport, standing in for a live SSH connection.

mod routing_test;
mod session_test;
mod stats_test;

use async_trait::async_trait;
use gatewire_common::{GatewayError, Result, SessionConfig};
use gatewire_core::forward::{BindTarget, Forwarder, ForwarderParams};
use gatewire_core::transport::{BoxedStream, SessionTransport};
use gatewire_core::{SessionRegistry, TunnelObserver};
use gatewire_http::PublicFacade;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

static NEXT_PORT: std::sync::atomic::AtomicU16 = std::sync::atomic::AtomicU16::new(30000);

pub fn get_free_port() -> u16 {
    loop {
        let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return port;
        }
    }
}

/// Wait for a listener to come up.
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Poll `predicate` until it holds or the deadline passes.
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

/// Transport double: back-channels are in-memory duplex pipes handed to the
/// test's backend task, and liveness probes succeed until `go_silent`.
pub struct MockTransport {
    alive: AtomicBool,
    probes: AtomicU32,
    closed: AtomicBool,
    backchannels: mpsc::UnboundedSender<DuplexStream>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                alive: AtomicBool::new(true),
                probes: AtomicU32::new(0),
                closed: AtomicBool::new(false),
                backchannels: tx,
            }),
            rx,
        )
    }

    /// Simulate a dead client: probes fail and no back-channel opens.
    pub fn go_silent(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn open_backchannel(
        &self,
        _dest: &BindTarget,
        _origin: SocketAddr,
    ) -> Result<BoxedStream> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(GatewayError::ChannelOpen("transport down".into()));
        }
        let (near, far) = tokio::io::duplex(64 * 1024);
        self.backchannels
            .send(far)
            .map_err(|_| GatewayError::ChannelOpen("backend gone".into()))?;
        Ok(Box::pin(near))
    }

    async fn keepalive(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Transport("probe lost".into()))
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Register a session and run its control loop, mirroring what the SSH
/// handler does for a live connection.
pub fn spawn_session(
    registry: &SessionRegistry,
    preferred: &str,
    config: SessionConfig,
    observer: Arc<dyn TunnelObserver>,
) -> (Arc<Forwarder>, Arc<MockTransport>, mpsc::UnboundedReceiver<DuplexStream>) {
    let (transport, backchannels) = MockTransport::new();
    let shared: Arc<dyn SessionTransport> = transport.clone();
    let cancel = CancellationToken::new();

    let (_, forwarder) = registry
        .register_with(Some(preferred), |id| {
            Forwarder::new(ForwarderParams {
                access_id: id.to_owned(),
                public_host: format!("{id}.test.local"),
                peer: "127.0.0.1:40000".parse().unwrap(),
                default_port: 2222,
                transport: Arc::clone(&shared),
                observer: Arc::clone(&observer),
                cancel: cancel.clone(),
                config: config.clone(),
            })
        })
        .expect("registration failed");
    forwarder.accept_forward("localhost", 3000);

    let registry = registry.clone();
    let serving = Arc::clone(&forwarder);
    tokio::spawn(async move {
        Arc::clone(&serving).serve().await;
        registry.remove_session(&serving);
    });

    (forwarder, transport, backchannels)
}

/// Backend task playing the client-local HTTP service: answers each
/// back-channel with a fixed 200 body.
pub fn serve_backend(
    mut backchannels: mpsc::UnboundedReceiver<DuplexStream>,
    body: &'static str,
) {
    tokio::spawn(async move {
        while let Some(mut stream) = backchannels.recv().await {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
}

/// Start a facade over `registry` on a free local port.
pub async fn start_facade(registry: SessionRegistry, shutdown: CancellationToken) -> SocketAddr {
    let addr: SocketAddr = format!("127.0.0.1:{}", get_free_port()).parse().unwrap();
    let facade = PublicFacade::new(addr, registry, shutdown);
    tokio::spawn(async move {
        let _ = facade.run().await;
    });
    assert!(wait_for_server(addr, Duration::from_secs(5)).await);
    addr
}

/// One raw HTTP/1.1 request against the facade; returns the full response.
pub async fn http_get(facade: SocketAddr, host: &str, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(facade)
        .await
        .expect("connect to facade");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("send request");

    let mut response = Vec::new();
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        stream.read_to_end(&mut response),
    )
    .await
    .expect("response timed out");
    String::from_utf8_lossy(&response).into_owned()
}
