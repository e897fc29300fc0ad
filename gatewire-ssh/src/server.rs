//! Transport session server: accepts SSH connections, authenticates them,
//! and wires one forwarder per session into the shared registry.

use crate::direct::{dial, relay_permitted};
use crate::transport::{send_text, SessionChannelSlot, SshTransport};
use async_trait::async_trait;
use gatewire_common::{GatewayConfig, GatewayError, Result};
use gatewire_core::events::{DiagnosticSink, NoopObserver, TunnelObserver};
use gatewire_core::forward::{Forwarder, ForwarderParams};
use gatewire_core::identity::{Credential, IdentityDirectory};
use gatewire_core::registry::SessionRegistry;
use gatewire_core::transport::SessionTransport;
use russh::server::{Auth, Config, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodSet};
use russh_keys::decode_secret_key;
use russh_keys::key::{KeyPair, PublicKey};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Username that may authenticate with unresolved credentials (anonymous
/// registration path).
const REGISTER_USER: &str = "register";

struct GatewayContext {
    registry: SessionRegistry,
    identities: IdentityDirectory,
    observer: Arc<dyn TunnelObserver>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    config: GatewayConfig,
    shutdown: CancellationToken,
}

pub struct GatewayServerBuilder {
    config: GatewayConfig,
    registry: SessionRegistry,
    identities: IdentityDirectory,
    observer: Arc<dyn TunnelObserver>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    host_key: Option<String>,
    shutdown: CancellationToken,
}

impl GatewayServerBuilder {
    /// Use an externally created registry, shared with the facade and any
    /// diagnostic consumers.
    #[must_use]
    pub fn registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn identities(mut self, identities: IdentityDirectory) -> Self {
        self.identities = identities;
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn TunnelObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Host key in OpenSSH secret-key format. Without one an ephemeral
    /// ed25519 key is generated at startup.
    #[must_use]
    pub fn host_key(mut self, pem: impl Into<String>) -> Self {
        self.host_key = Some(pem.into());
        self
    }

    #[must_use]
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> GatewayServer {
        GatewayServer {
            context: Arc::new(GatewayContext {
                registry: self.registry,
                identities: self.identities,
                observer: self.observer,
                diagnostics: self.diagnostics,
                config: self.config,
                shutdown: self.shutdown,
            }),
            host_key: self.host_key,
        }
    }
}

pub struct GatewayServer {
    context: Arc<GatewayContext>,
    host_key: Option<String>,
}

impl GatewayServer {
    pub fn builder(config: GatewayConfig) -> GatewayServerBuilder {
        GatewayServerBuilder {
            config,
            registry: SessionRegistry::new(),
            identities: IdentityDirectory::default(),
            observer: Arc::new(NoopObserver),
            diagnostics: None,
            host_key: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// The registry this server writes; the facade shares it read-only.
    pub fn registry(&self) -> SessionRegistry {
        self.context.registry.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.shutdown.clone()
    }

    fn ssh_config(&self) -> Result<Arc<Config>> {
        let key = match &self.host_key {
            Some(text) => decode_secret_key(text, None)
                .map_err(|e| GatewayError::Config(format!("host key: {e}")))?,
            None => KeyPair::generate_ed25519()
                .ok_or_else(|| GatewayError::Config("ed25519 key generation failed".into()))?,
        };
        Ok(Arc::new(Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![key],
            ..Default::default()
        }))
    }

    /// Accept loop. Runs until the shutdown token fires, then drains every
    /// live session before returning. A bind failure is process-fatal.
    pub async fn run(self) -> Result<()> {
        let ssh_config = self.ssh_config()?;
        let listener = TcpListener::bind(self.context.config.ssh_bind).await?;
        info!("session server listening on {}", self.context.config.ssh_bind);

        loop {
            tokio::select! {
                _ = self.context.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    let handler = ClientHandler::new(Arc::clone(&self.context), peer);
                    let config = Arc::clone(&ssh_config);
                    let token = self.context.shutdown.child_token();
                    tokio::spawn(async move {
                        let session = match russh::server::run_stream(config, stream, handler).await {
                            Ok(session) => session,
                            Err(e) => {
                                debug!(%peer, "handshake failed: {e}");
                                return;
                            }
                        };
                        tokio::select! {
                            result = session => {
                                if let Err(e) = result {
                                    debug!(%peer, "session ended: {e}");
                                }
                            }
                            _ = token.cancelled() => {
                                debug!(%peer, "session cancelled by shutdown");
                            }
                        }
                    });
                }
            }
        }

        self.drain().await;
        info!("session server stopped");
        Ok(())
    }

    /// Signal every live session and wait for the registry to empty, so all
    /// back-channel pairs are closed before process exit proceeds.
    async fn drain(&self) {
        self.context
            .registry
            .for_each(|_, forwarder| forwarder.begin_drain());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !self.context.registry.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.context.registry.len(),
                    "drain deadline hit with sessions still registered"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

struct ClientHandler {
    context: Arc<GatewayContext>,
    peer: SocketAddr,
    /// Alias from a resolved credential; `None` on the registration path.
    alias: Option<String>,
    /// Remote-forward request seen before the session channel opened.
    pending_forward: Option<(String, u32)>,
    session_channel: SessionChannelSlot,
    forwarder: Option<Arc<Forwarder>>,
}

impl ClientHandler {
    fn new(context: Arc<GatewayContext>, peer: SocketAddr) -> Self {
        Self {
            context,
            peer,
            alias: None,
            pending_forward: None,
            session_channel: Arc::new(Mutex::new(None)),
            forwarder: None,
        }
    }

    fn ssh_port(&self) -> u32 {
        u32::from(self.context.config.ssh_bind.port())
    }

    fn effective_port(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.ssh_port()
        } else {
            requested
        }
    }
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> std::result::Result<Auth, Self::Error> {
        Ok(Auth::Reject {
            proceed_with_methods: Some(MethodSet::PUBLICKEY | MethodSet::PASSWORD),
        })
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint();
        if let Some(alias) = self
            .context
            .identities
            .resolve(Credential::PublicKey(&fingerprint))
        {
            debug!(peer = %self.peer, alias, "public key resolved");
            self.alias = Some(alias.to_owned());
            return Ok(Auth::Accept);
        }
        if user == REGISTER_USER {
            debug!(peer = %self.peer, %fingerprint, "anonymous registration");
            return Ok(Auth::Accept);
        }
        warn!(peer = %self.peer, %user, "unresolved public key refused");
        Ok(Auth::Reject {
            proceed_with_methods: Some(MethodSet::PASSWORD),
        })
    }

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        if let Some(alias) = self.context.identities.resolve(Credential::Password {
            username: user,
            password,
        }) {
            debug!(peer = %self.peer, alias, "password resolved");
            self.alias = Some(alias.to_owned());
            return Ok(Auth::Accept);
        }
        if user == REGISTER_USER {
            return Ok(Auth::Accept);
        }
        warn!(peer = %self.peer, %user, "password refused");
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        if self.forwarder.is_some() {
            // One managed session channel per connection.
            return Ok(false);
        }

        {
            let mut slot = match self.session_channel.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(channel.id());
        }

        let handle = session.handle();
        let transport: Arc<dyn SessionTransport> = Arc::new(SshTransport::new(
            handle.clone(),
            Arc::clone(&self.session_channel),
        ));

        let context = &self.context;
        let token = context.shutdown.child_token();
        let peer = self.peer;
        let default_port = self.ssh_port();
        let session_config = context.config.session.clone();

        let registered = context.registry.register_with(self.alias.as_deref(), |id| {
            Forwarder::new(ForwarderParams {
                access_id: id.to_owned(),
                public_host: context.config.public_host(id),
                peer,
                default_port,
                transport: Arc::clone(&transport),
                observer: Arc::clone(&context.observer),
                cancel: token.clone(),
                config: session_config.clone(),
            })
        });

        let (access_id, forwarder) = match registered {
            Ok(pair) => pair,
            Err(e) => {
                warn!(peer = %self.peer, "registration failed: {e}");
                send_text(&handle, channel.id(), "could not allocate an access id\r\n").await;
                return Ok(false);
            }
        };

        if let Some((addr, port)) = self.pending_forward.take() {
            forwarder.accept_forward(&addr, port);
        }

        let public_host = forwarder.public_host().to_owned();
        info!(peer = %self.peer, access_id, %public_host, "session registered");
        self.context.observer.session_opened(&access_id, &public_host);
        send_text(
            &handle,
            channel.id(),
            &format!("Forwarding enabled at http://{public_host}\r\n"),
        )
        .await;

        // The control loop owns the session from here; its registry entry
        // goes away before the loop reports the session closed.
        let registry = self.context.registry.clone();
        let serving = Arc::clone(&forwarder);
        tokio::spawn(async move {
            Arc::clone(&serving).serve().await;
            registry.remove_session(&serving);
        });

        self.forwarder = Some(forwarder);
        Ok(true)
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        // Ctrl+C on the status channel ends the session.
        if data == [3] {
            return Err(russh::Error::Disconnect);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let effective = self.effective_port(*port);
        match &self.forwarder {
            Some(forwarder) => {
                forwarder.accept_forward(address, effective);
            }
            None => {
                // Negotiation arrived before the session channel; applied
                // once the forwarder exists.
                self.pending_forward = Some((address.to_owned(), effective));
            }
        }
        debug!(peer = %self.peer, %address, port = effective, "remote forward accepted");
        *port = effective;
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        self.pending_forward = None;
        match self.forwarder.take() {
            Some(forwarder) => {
                info!(peer = %self.peer, access_id = forwarder.access_id(), %address, "forward cancelled");
                self.context.registry.remove_session(&forwarder);
                forwarder.begin_drain();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };

        if port == self.context.config.diagnostic_port {
            let access_id = self
                .forwarder
                .as_ref()
                .map_or_else(|| self.peer.to_string(), |f| f.access_id().to_owned());
            return match &self.context.diagnostics {
                Some(sink) => {
                    let accepted = sink.attach(&access_id, Box::pin(channel.into_stream()));
                    debug!(peer = %self.peer, accepted, "diagnostic channel");
                    Ok(accepted)
                }
                None => {
                    debug!(peer = %self.peer, "no diagnostic sink attached");
                    Ok(false)
                }
            };
        }

        if !relay_permitted(host_to_connect) {
            warn!(peer = %self.peer, host = host_to_connect, port, "relay refused by policy");
            return Ok(false);
        }

        match dial(host_to_connect, port).await {
            Ok(mut outbound) => {
                tokio::spawn(async move {
                    let mut stream = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut outbound).await;
                });
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        // Connection gone (clean or not): the registry entry and every
        // back-channel pair must go with it.
        if let Some(forwarder) = &self.forwarder {
            self.context.registry.remove_session(forwarder);
            forwarder.begin_drain();
        }
    }
}
