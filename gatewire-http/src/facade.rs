//! The facade: raw listener, host-label routing, splice hand-off.

use bytes::BytesMut;
use gatewire_common::{FacadeConfig, GatewayError, Result};
use gatewire_core::correlate::CorrelatedStream;
use gatewire_core::registry::SessionRegistry;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_HEADERS: usize = 64;

/// What the routing peek learned about an inbound request.
#[derive(Debug)]
struct PeekedRequest {
    method: String,
    path: String,
    host: String,
}

pub struct PublicFacade {
    addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: CancellationToken,
    config: FacadeConfig,
}

impl PublicFacade {
    pub fn new(addr: SocketAddr, registry: SessionRegistry, shutdown: CancellationToken) -> Self {
        Self::with_config(addr, registry, shutdown, FacadeConfig::default())
    }

    pub fn with_config(
        addr: SocketAddr,
        registry: SessionRegistry,
        shutdown: CancellationToken,
        config: FacadeConfig,
    ) -> Self {
        Self {
            addr,
            registry,
            shutdown,
            config,
        }
    }

    /// Accept loop. A bind failure is fatal and propagates; per-connection
    /// errors never leave their own task.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("facade listening on {}", self.addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("facade shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let registry = self.registry.clone();
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, registry, config).await;
                            });
                        }
                        Err(e) => {
                            warn!("accept failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: SessionRegistry,
    config: FacadeConfig,
) {
    let (lead, peeked) = match timeout(
        config.header_timeout,
        peek_header_block(&mut stream, config.max_header_block),
    )
    .await
    {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            debug!(%peer, "rejecting malformed request: {e}");
            respond_bad_request(&mut stream).await;
            return;
        }
        Err(_) => {
            debug!(%peer, "header block timed out");
            respond_bad_request(&mut stream).await;
            return;
        }
    };

    // Routing key: first label of the Host header. A host without a label
    // separator never reaches the registry.
    let Some(access_id) = routing_key(&peeked.host) else {
        warn!(%peer, host = %peeked.host, "host has no routing label");
        respond_bad_request(&mut stream).await;
        return;
    };

    let Some(forwarder) = registry.get(access_id) else {
        warn!(%peer, access_id, method = %peeked.method, path = %peeked.path, "tunnel not found");
        respond_not_found(&mut stream, access_id).await;
        return;
    };

    debug!(%peer, access_id, method = %peeked.method, path = %peeked.path, "routing connection");

    let access_id = access_id.to_owned();
    let conn = CorrelatedStream::with_lead(Box::pin(stream) as gatewire_core::BoxedStream, peer, lead);
    if let Err(mut conn) = forwarder.dispatch(conn).await {
        // The session drained between lookup and hand-off; answer like a
        // lookup miss so the caller is not left hanging.
        warn!(%peer, access_id, "session drained during hand-off");
        respond_not_found(&mut conn, &access_id).await;
    }
}

/// Read until a complete request-header block is buffered. The consumed
/// bytes are returned untouched so the full original request still reaches
/// the client.
async fn peek_header_block(
    stream: &mut TcpStream,
    max_len: usize,
) -> Result<(BytesMut, PeekedRequest)> {
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(GatewayError::Protocol("connection closed mid-header".into()));
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let host = req
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("host"))
                    .map(|h| String::from_utf8_lossy(h.value).into_owned())
                    .ok_or_else(|| GatewayError::Protocol("missing Host header".into()))?;
                let peeked = PeekedRequest {
                    method: req.method.unwrap_or("").to_owned(),
                    path: req.path.unwrap_or("").to_owned(),
                    host,
                };
                return Ok((buf, peeked));
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > max_len {
                    return Err(GatewayError::Protocol("header block too large".into()));
                }
            }
            Err(e) => {
                return Err(GatewayError::Protocol(format!("bad request head: {e}")));
            }
        }
    }
}

/// First dot-separated label of a host, with any port stripped. `None` when
/// the host carries no label separator.
fn routing_key(host: &str) -> Option<&str> {
    let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
    let (label, rest) = host.split_once('.')?;
    if label.is_empty() || rest.is_empty() {
        return None;
    }
    Some(label)
}

async fn respond_bad_request(stream: &mut (impl AsyncWrite + Unpin)) {
    let body = "Bad Request\n";
    let response = format!(
        "HTTP/1.0 400 Bad Request\r\nServer: gatewire\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn respond_not_found(stream: &mut (impl AsyncWrite + Unpin), access_id: &str) {
    let body = format!("Tunnel {access_id} not found\n");
    let response = format!(
        "HTTP/1.0 404 Not Found\r\nServer: gatewire\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
