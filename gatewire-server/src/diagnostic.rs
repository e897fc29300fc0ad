//! Diagnostic sink: a client that opens a direct channel to the reserved
//! diagnostic port receives a JSON dump of every registered session's stats
//! and recent exchanges, then the channel closes.

use gatewire_core::{BoxedStream, DiagnosticSink, SessionRegistry};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct StatsReport {
    registry: SessionRegistry,
}

impl StatsReport {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    fn render(&self) -> String {
        let mut sessions = Vec::new();
        self.registry.for_each(|access_id, forwarder| {
            sessions.push(json!({
                "access_id": access_id,
                "public_host": forwarder.public_host(),
                "state": format!("{:?}", forwarder.state()),
                "stats": forwarder.snapshot(),
                "recent": forwarder.recent_exchanges(),
            }));
        });
        let report = json!({ "sessions": sessions });
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".into())
    }
}

impl DiagnosticSink for StatsReport {
    fn attach(&self, access_id: &str, mut stream: BoxedStream) -> bool {
        debug!(access_id, "diagnostic report requested");
        let body = self.render();
        tokio::spawn(async move {
            let _ = stream.write_all(body.as_bytes()).await;
            let _ = stream.write_all(b"\n").await;
            let _ = stream.shutdown().await;
        });
        true
    }
}
