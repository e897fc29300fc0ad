//! Request/response correlation over a spliced byte stream.
//!
//! [`CorrelatedStream`] wraps the public side of a tunnel connection. Bytes
//! read from the wrapped stream are request traffic heading into the client;
//! bytes written to it are response traffic coming back. A pair of buffering
//! header scanners watch both directions and pair complete request heads
//! with the next complete response head in arrival order, yielding an
//! [`Exchange`] with elapsed time.
//!
//! Correlation is opportunistic: a partial or unparseable frame is simply
//! not correlated. The FIFO assumes non-pipelined request/response
//! alternation per connection; pipelined traffic may mis-correlate, which is
//! an accepted limitation of this layer.

use bytes::{Buf, BytesMut};
use gatewire_common::constants::{CORRELATION_DEPTH, MAX_HEADER_BLOCK};
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, trace};

const MAX_HEADERS: usize = 64;

/// Parsed request head, captured when a complete header block crosses the
/// stream.
#[derive(Debug, Clone, Serialize)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub content_length: Option<u64>,
}

/// Parsed response head.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub content_length: Option<u64>,
}

/// One completed request/response pair observed on a connection.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub request: RequestHead,
    pub response: ResponseHead,
    pub elapsed_ms: u64,
    pub completed_at: SystemTime,
}

/// Callback invoked once per completed exchange.
pub type Dispatch = Arc<dyn Fn(Exchange) + Send + Sync>;

/// Buffering scanner for request header blocks.
///
/// Accumulates bytes until `httparse` sees a complete header block, then
/// resets. Parse errors and buffer overflow also reset; both are non-fatal.
#[derive(Debug, Default)]
pub struct RequestScanner {
    buf: BytesMut,
}

impl RequestScanner {
    pub fn push(&mut self, data: &[u8]) -> Option<RequestHead> {
        self.buf.extend_from_slice(data);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(_)) => {
                let head = RequestHead {
                    method: req.method.unwrap_or("").to_owned(),
                    path: req.path.unwrap_or("").to_owned(),
                    host: header_str(req.headers, "host"),
                    content_length: header_u64(req.headers, "content-length"),
                };
                self.buf.clear();
                Some(head)
            }
            Ok(httparse::Status::Partial) => {
                self.cap_buffer();
                None
            }
            Err(e) => {
                trace!("request scan reset: {e}");
                self.buf.clear();
                None
            }
        }
    }

    fn cap_buffer(&mut self) {
        if self.buf.len() > MAX_HEADER_BLOCK {
            self.buf.clear();
        }
    }
}

/// Buffering scanner for response header blocks.
#[derive(Debug, Default)]
pub struct ResponseScanner {
    buf: BytesMut,
}

impl ResponseScanner {
    pub fn push(&mut self, data: &[u8]) -> Option<ResponseHead> {
        self.buf.extend_from_slice(data);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);
        match resp.parse(&self.buf) {
            Ok(httparse::Status::Complete(_)) => {
                let head = ResponseHead {
                    status: resp.code.unwrap_or(0),
                    reason: resp.reason.unwrap_or("").to_owned(),
                    content_length: header_u64(resp.headers, "content-length"),
                };
                self.buf.clear();
                Some(head)
            }
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > MAX_HEADER_BLOCK {
                    self.buf.clear();
                }
                None
            }
            Err(e) => {
                trace!("response scan reset: {e}");
                self.buf.clear();
                None
            }
        }
    }
}

fn header_str(headers: &[httparse::Header<'_>], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| String::from_utf8_lossy(h.value).into_owned())
}

fn header_u64(headers: &[httparse::Header<'_>], name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|v| v.trim().parse().ok())
}

struct Pending {
    request: RequestHead,
    started: Instant,
}

/// Duplex stream wrapper that correlates request and response frames.
pub struct CorrelatedStream<S> {
    inner: S,
    /// Header bytes the facade already consumed while routing; replayed to
    /// readers before the wrapped stream is polled again.
    lead: BytesMut,
    requests: RequestScanner,
    responses: ResponseScanner,
    pending: VecDeque<Pending>,
    dispatch: Option<Dispatch>,
    peer: std::net::SocketAddr,
}

impl<S> CorrelatedStream<S> {
    pub fn new(inner: S, peer: std::net::SocketAddr) -> Self {
        Self::with_lead(inner, peer, BytesMut::new())
    }

    /// Wrap a stream whose leading `lead` bytes were already read off the
    /// socket. The bytes still reach the client: reads are served from
    /// `lead` first, and the request scanner sees them like any other read.
    pub fn with_lead(inner: S, peer: std::net::SocketAddr, lead: BytesMut) -> Self {
        Self {
            inner,
            lead,
            requests: RequestScanner::default(),
            responses: ResponseScanner::default(),
            pending: VecDeque::new(),
            dispatch: None,
            peer,
        }
    }

    /// Install the exchange callback. Set by the forwarder before the
    /// connection is enqueued for splicing.
    pub fn set_dispatch(&mut self, dispatch: Dispatch) {
        self.dispatch = Some(dispatch);
    }

    pub fn peer(&self) -> std::net::SocketAddr {
        self.peer
    }

    fn observe_read(&mut self, data: &[u8]) {
        if let Some(request) = self.requests.push(data) {
            if self.pending.len() >= CORRELATION_DEPTH {
                // Non-pipelined connections never get here; drop rather
                // than stall the splice.
                debug!(peer = %self.peer, "correlation queue full, dropping entry");
                return;
            }
            self.pending.push_back(Pending {
                request,
                started: Instant::now(),
            });
        }
    }

    fn observe_write(&mut self, data: &[u8]) {
        if let Some(response) = self.responses.push(data) {
            let Some(entry) = self.pending.pop_front() else {
                trace!(peer = %self.peer, "response with no pending request");
                return;
            };
            if let Some(dispatch) = &self.dispatch {
                let exchange = Exchange {
                    request: entry.request,
                    response,
                    elapsed_ms: entry.started.elapsed().as_millis() as u64,
                    completed_at: SystemTime::now(),
                };
                dispatch(exchange);
            }
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CorrelatedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.lead.is_empty() {
            let n = this.lead.len().min(buf.remaining());
            buf.put_slice(&this.lead[..n]);
            this.lead.advance(n);
            this.observe_read(&buf.filled()[buf.filled().len() - n..]);
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = buf.filled().len();
                if filled > before {
                    // Borrow the freshly read slice without aliasing `this`.
                    let data = buf.filled()[before..filled].to_vec();
                    this.observe_read(&data);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CorrelatedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.observe_write(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
