//! Tracing-backed observer for session and exchange events.

use gatewire_core::{Exchange, StatSnapshot, TunnelObserver};
use tracing::info;

pub struct LogObserver;

impl TunnelObserver for LogObserver {
    fn session_opened(&self, access_id: &str, public_host: &str) {
        info!(access_id, public_host, "session opened");
    }

    fn session_closed(&self, access_id: &str) {
        info!(access_id, "session closed");
    }

    fn exchange_completed(&self, access_id: &str, snapshot: &StatSnapshot, exchange: &Exchange) {
        info!(
            access_id,
            method = %exchange.request.method,
            path = %exchange.request.path,
            status = exchange.response.status,
            elapsed_ms = exchange.elapsed_ms,
            requests = snapshot.requests,
            "exchange completed"
        );
    }
}
