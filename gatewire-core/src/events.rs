//! Observer seams for external stats/event consumers.
//!
//! The dashboard and debug panel live outside the core; they receive
//! lifecycle and exchange notifications through [`TunnelObserver`] and, for
//! the reserved diagnostic port, a raw channel stream through
//! [`DiagnosticSink`]. Observers read stat snapshots; they never mutate the
//! stat store.

use crate::correlate::Exchange;
use crate::stats::StatSnapshot;
use crate::transport::BoxedStream;

/// Consumer of session lifecycle and completed-exchange events.
pub trait TunnelObserver: Send + Sync {
    /// A session registered and is reachable at `public_host`.
    fn session_opened(&self, access_id: &str, public_host: &str);

    /// The session's registry entry is gone and its channels are closed.
    fn session_closed(&self, access_id: &str);

    /// One request/response pair completed on the session.
    fn exchange_completed(&self, access_id: &str, snapshot: &StatSnapshot, exchange: &Exchange);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TunnelObserver for NoopObserver {
    fn session_opened(&self, _access_id: &str, _public_host: &str) {}
    fn session_closed(&self, _access_id: &str) {}
    fn exchange_completed(&self, _access_id: &str, _snapshot: &StatSnapshot, _exchange: &Exchange) {
    }
}

/// Receiver for diagnostic-port channels opened by a client.
///
/// Returning `false` rejects the channel; with no sink attached every
/// diagnostic channel is rejected.
pub trait DiagnosticSink: Send + Sync {
    fn attach(&self, access_id: &str, stream: BoxedStream) -> bool;
}
