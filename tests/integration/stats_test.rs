//! Exchange correlation and per-session counters, end to end.

use super::{http_get, serve_backend, spawn_session, start_facade, wait_until};
use gatewire_common::SessionConfig;
use gatewire_core::{Exchange, SessionRegistry, StatSnapshot, TunnelObserver};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingObserver {
    exchanges: AtomicU32,
    closed: AtomicU32,
}

impl TunnelObserver for CountingObserver {
    fn session_opened(&self, _access_id: &str, _public_host: &str) {}

    fn session_closed(&self, _access_id: &str) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn exchange_completed(&self, _access_id: &str, _snapshot: &StatSnapshot, _exchange: &Exchange) {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_exchange_recorded_exactly_once() {
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();
    let observer = Arc::new(CountingObserver::default());

    let (forwarder, _transport, backend) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        observer.clone(),
    );
    serve_backend(backend, "pong");

    let facade = start_facade(registry.clone(), shutdown.clone()).await;

    let response = http_get(facade, "alpha.test.local", "/ping").await;
    assert!(response.contains("pong"));

    assert!(
        wait_until(Duration::from_secs(2), || {
            observer.exchanges.load(Ordering::SeqCst) == 1
        })
        .await,
        "exchange was not observed exactly once"
    );

    let snap = forwarder.snapshot();
    assert_eq!(snap.requests, 1);
    assert_eq!(snap.responses, 1);
    assert_eq!(snap.total_connections, 1);
    assert_eq!(snap.bytes_sent, 4); // Content-Length of "pong"

    let recent = forwarder.recent_exchanges();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].request.method, "GET");
    assert_eq!(recent[0].request.path, "/ping");
    assert_eq!(recent[0].response.status, 200);

    shutdown.cancel();
}

#[tokio::test]
async fn test_counters_accumulate_over_connections() {
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();
    let observer = Arc::new(CountingObserver::default());

    let (forwarder, _transport, backend) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        observer.clone(),
    );
    serve_backend(backend, "ok");

    let facade = start_facade(registry.clone(), shutdown.clone()).await;

    for i in 0..3 {
        let response = http_get(facade, "alpha.test.local", &format!("/r{i}")).await;
        assert!(response.contains("ok"), "request {i} failed: {response}");
    }

    assert!(
        wait_until(Duration::from_secs(2), || forwarder.snapshot().requests == 3).await
    );
    let snap = forwarder.snapshot();
    assert_eq!(snap.responses, 3);
    assert_eq!(snap.total_connections, 3);
    assert_eq!(observer.exchanges.load(Ordering::SeqCst), 3);

    // Ring holds them newest-last.
    let recent = forwarder.recent_exchanges();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2].request.path, "/r2");

    shutdown.cancel();
}

#[tokio::test]
async fn test_drain_notifies_observer_once() {
    let registry = SessionRegistry::new();
    let observer = Arc::new(CountingObserver::default());

    let (forwarder, _transport, _backend) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        observer.clone(),
    );

    forwarder.begin_drain();
    assert!(
        wait_until(Duration::from_secs(2), || {
            observer.closed.load(Ordering::SeqCst) == 1
        })
        .await
    );
    // A second drain is a no-op.
    forwarder.begin_drain();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(observer.closed.load(Ordering::SeqCst), 1);
}
