//! Per-session forwarding engine.
//!
//! One [`Forwarder`] owns an authenticated tunnel session: it records the
//! negotiated remote-forward target, runs the control loop (liveness probes,
//! inbound queue, cancellation), and splices each inbound public connection
//! onto a back-channel opened into the client.

use crate::correlate::{CorrelatedStream, Exchange};
use crate::events::TunnelObserver;
use crate::stats::{ActivityRing, SessionStats, StatSnapshot};
use crate::transport::{BoxedStream, SessionTransport};
use dashmap::DashMap;
use gatewire_common::SessionConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An inbound public connection, already wrapped for correlation.
pub type InboundConn = CorrelatedStream<BoxedStream>;

/// Host and port the client asked to receive forwarded traffic on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    pub addr: String,
    pub port: u32,
}

/// Lifecycle of a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ForwarderState {
    /// Session authenticated, remote-forward target not active yet.
    Negotiating = 0,
    /// Control loop running, connections accepted.
    Active = 1,
    /// No new connections; existing pairs closing.
    Draining = 2,
    Closed = 3,
}

impl ForwarderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Negotiating,
            1 => Self::Active,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Everything a forwarder needs at construction.
pub struct ForwarderParams {
    pub access_id: String,
    pub public_host: String,
    /// Client transport peer address.
    pub peer: SocketAddr,
    /// Ambient local port of the transport session, used when the client
    /// requests bind port 0 or never negotiates a target.
    pub default_port: u32,
    pub transport: Arc<dyn SessionTransport>,
    pub observer: Arc<dyn TunnelObserver>,
    /// Child of the process-wide shutdown token.
    pub cancel: CancellationToken,
    pub config: SessionConfig,
}

pub struct Forwarder {
    access_id: String,
    public_host: String,
    peer: SocketAddr,
    default_port: u32,
    transport: Arc<dyn SessionTransport>,
    observer: Arc<dyn TunnelObserver>,
    config: SessionConfig,

    bind_target: Mutex<Option<BindTarget>>,
    stats: Arc<SessionStats>,
    activity: Arc<ActivityRing>,
    cancel: CancellationToken,
    state: AtomicU8,

    inbound_tx: mpsc::Sender<InboundConn>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundConn>>>,

    channel_seq: AtomicU64,
    /// Back-channel pairs currently spliced, by per-session sequence number.
    channels: DashMap<u64, SocketAddr>,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("access_id", &self.access_id)
            .field("state", &self.state())
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    pub fn new(params: ForwarderParams) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(params.config.inbound_queue_depth.max(1));
        Arc::new(Self {
            access_id: params.access_id,
            public_host: params.public_host,
            peer: params.peer,
            default_port: params.default_port,
            transport: params.transport,
            observer: params.observer,
            config: params.config,
            bind_target: Mutex::new(None),
            stats: Arc::new(SessionStats::default()),
            activity: Arc::new(ActivityRing::default()),
            cancel: params.cancel,
            state: AtomicU8::new(ForwarderState::Negotiating as u8),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            channel_seq: AtomicU64::new(0),
            channels: DashMap::new(),
        })
    }

    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    pub fn public_host(&self) -> &str {
        &self.public_host
    }

    pub fn state(&self) -> ForwarderState {
        ForwarderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> StatSnapshot {
        self.stats.snapshot()
    }

    pub fn recent_exchanges(&self) -> Vec<Exchange> {
        self.activity.recent()
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&self, state: ForwarderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Record the remote-forward target from a `tcpip-forward` request.
    /// A requested port of 0 defaults to the session's ambient local port.
    /// Returns the effective bind port to acknowledge to the client.
    pub fn accept_forward(&self, addr: &str, port: u32) -> u32 {
        let effective = if port == 0 { self.default_port } else { port };
        let mut target = lock(&self.bind_target);
        *target = Some(BindTarget {
            addr: addr.to_owned(),
            port: effective,
        });
        debug!(access_id = %self.access_id, %addr, port = effective, "remote forward recorded");
        effective
    }

    /// The negotiated bind target, or the ambient default when the client
    /// never issued a forward request.
    pub fn bind_target(&self) -> BindTarget {
        lock(&self.bind_target).clone().unwrap_or(BindTarget {
            addr: "localhost".to_owned(),
            port: self.default_port,
        })
    }

    /// Stop accepting connections and start teardown. Idempotent; used for
    /// `cancel-tcpip-forward`, liveness failure and process shutdown alike.
    pub fn begin_drain(&self) {
        self.cancel.cancel();
    }

    /// Hand an inbound public connection to this session. Installs the
    /// exchange callback, then queues the connection for the control loop.
    /// When the session drained and its queue is gone, the connection comes
    /// back so the caller can still answer it.
    pub async fn dispatch(
        self: &Arc<Self>,
        mut conn: InboundConn,
    ) -> std::result::Result<(), InboundConn> {
        let this = Arc::clone(self);
        conn.set_dispatch(Arc::new(move |exchange| this.on_exchange(&exchange)));
        self.inbound_tx.send(conn).await.map_err(|e| e.0)
    }

    fn on_exchange(&self, exchange: &Exchange) {
        self.stats.record_exchange(exchange);
        self.activity.push(exchange.clone());
        self.observer
            .exchange_completed(&self.access_id, &self.stats.snapshot(), exchange);
    }

    /// Control loop. Runs until cancellation or liveness failure, then
    /// drains: closes every back-channel pair, signals the transport, and
    /// notifies the observer.
    pub async fn serve(self: Arc<Self>) {
        let Some(mut inbound) = lock(&self.inbound_rx).take() else {
            return;
        };
        self.set_state(ForwarderState::Active);
        info!(access_id = %self.access_id, peer = %self.peer, "session active");

        let interval = self.config.keepalive_interval;
        let mut probes = time::interval_at(Instant::now() + interval, interval);
        probes.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut failures: u32 = 0;
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                _ = probes.tick() => {
                    let probe = time::timeout(interval, self.transport.keepalive()).await;
                    match probe {
                        Ok(Ok(())) => failures = 0,
                        Ok(Err(_)) | Err(_) => {
                            failures += 1;
                            warn!(
                                access_id = %self.access_id,
                                failures, "keepalive probe failed"
                            );
                            if failures > self.config.keepalive_max_failures {
                                warn!(access_id = %self.access_id, "liveness failure, closing session");
                                self.cancel.cancel();
                            }
                        }
                    }
                }

                conn = inbound.recv() => match conn {
                    Some(conn) => {
                        let this = Arc::clone(&self);
                        workers.spawn(async move { this.splice(conn).await });
                    }
                    None => break,
                },
            }
        }

        self.set_state(ForwarderState::Draining);
        drop(inbound);
        // Cancellation unblocks every splice worker; wait for them so all
        // pairs are closed before the session reports itself gone.
        self.cancel.cancel();
        while workers.join_next().await.is_some() {}
        self.transport.close().await;
        self.set_state(ForwarderState::Closed);
        self.observer.session_closed(&self.access_id);
        info!(access_id = %self.access_id, "session closed");
    }

    /// Splice one public connection onto a fresh back-channel.
    async fn splice(self: Arc<Self>, conn: InboundConn) {
        let origin = conn.peer();
        let dest = self.bind_target();

        let back = match self.transport.open_backchannel(&dest, origin).await {
            Ok(stream) => stream,
            Err(e) => {
                // Per-connection failure: the inbound side is dropped
                // (closed) and the session carries on.
                warn!(access_id = %self.access_id, %origin, "back-channel open failed: {e}");
                return;
            }
        };

        let id = self.channel_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.channels.insert(id, origin);
        self.stats.connection_opened();
        debug!(access_id = %self.access_id, channel = id, %origin, "back-channel open");

        let (mut public_rd, mut public_wr) = tokio::io::split(conn);
        let (mut back_rd, mut back_wr) = tokio::io::split(back);

        // Either direction finishing (EOF or error) tears down the pair:
        // leaving the select drops all four halves.
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            r = tokio::io::copy(&mut public_rd, &mut back_wr) => {
                if let Err(e) = r {
                    debug!(access_id = %self.access_id, channel = id, "inbound copy ended: {e}");
                }
            }
            r = tokio::io::copy(&mut back_rd, &mut public_wr) => {
                if let Err(e) = r {
                    debug!(access_id = %self.access_id, channel = id, "outbound copy ended: {e}");
                }
            }
        }

        self.channels.remove(&id);
        self.stats.connection_closed();
        debug!(access_id = %self.access_id, channel = id, "back-channel closed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
