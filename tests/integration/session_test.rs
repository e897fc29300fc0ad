//! Session lifecycle: liveness probing, drain, registry consistency.

use super::{spawn_session, wait_until};
use gatewire_common::SessionConfig;
use gatewire_core::{ForwarderState, NoopObserver, SessionRegistry};
use std::sync::Arc;
use std::time::Duration;

fn fast_probes() -> SessionConfig {
    SessionConfig {
        keepalive_interval: Duration::from_millis(25),
        keepalive_max_failures: 2,
        inbound_queue_depth: 4,
    }
}

#[tokio::test]
async fn test_drain_closes_session_and_registry() {
    let registry = SessionRegistry::new();
    let (forwarder, transport, _backend) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );
    assert!(registry.get("alpha").is_some());

    forwarder.begin_drain();
    assert!(
        wait_until(Duration::from_secs(2), || registry.is_empty()).await,
        "registry entry not removed after drain"
    );
    assert!(
        wait_until(Duration::from_secs(2), || {
            forwarder.state() == ForwarderState::Closed
        })
        .await
    );
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_liveness_failure_tears_down_session() {
    let registry = SessionRegistry::new();
    let (forwarder, transport, _backend) = spawn_session(
        &registry,
        "alpha",
        fast_probes(),
        Arc::new(NoopObserver),
    );
    transport.go_silent();

    // Teardown requires more consecutive failures than the threshold.
    assert!(
        wait_until(Duration::from_secs(3), || registry.is_empty()).await,
        "silent session was never torn down"
    );
    assert!(transport.probe_count() > 2);
    assert_eq!(forwarder.state(), ForwarderState::Closed);
}

#[tokio::test]
async fn test_healthy_session_survives_probing() {
    let registry = SessionRegistry::new();
    let (_forwarder, transport, _backend) = spawn_session(
        &registry,
        "alpha",
        fast_probes(),
        Arc::new(NoopObserver),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(transport.probe_count() >= 5, "probes did not run");
    assert!(registry.get("alpha").is_some(), "healthy session dropped");
}

#[tokio::test]
async fn test_stale_teardown_spares_reclaimed_id() {
    let registry = SessionRegistry::new();
    let (first, _t1, _b1) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );

    // The client cancels its forward: the key is freed while the first
    // session is still winding down, and a new session reclaims it.
    registry.remove(first.access_id());
    let (second, _t2, _b2) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );
    assert_eq!(second.access_id(), "alpha");

    first.begin_drain();
    assert!(
        wait_until(Duration::from_secs(2), || {
            first.state() == ForwarderState::Closed
        })
        .await
    );

    // The reclaimed id still routes to the live session.
    let current = registry
        .get("alpha")
        .expect("live session evicted by stale teardown");
    assert!(Arc::ptr_eq(&current, &second));
}

#[tokio::test]
async fn test_duplicate_alias_falls_back_to_generated_id() {
    let registry = SessionRegistry::new();
    let (first, _t1, _b1) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );
    let (second, _t2, _b2) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );

    assert_eq!(first.access_id(), "alpha");
    assert_ne!(second.access_id(), "alpha");
    assert_eq!(registry.len(), 2);
}
