//! Host-label routing through the public facade.

use super::{http_get, serve_backend, spawn_session, start_facade};
use gatewire_common::SessionConfig;
use gatewire_core::{NoopObserver, SessionRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_routes_by_host_label_across_sessions() {
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();

    let (_f1, _t1, backend1) = spawn_session(
        &registry,
        "alpha",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );
    serve_backend(backend1, "served by alpha");

    let (_f2, _t2, backend2) = spawn_session(
        &registry,
        "beta",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );
    serve_backend(backend2, "served by beta");

    let facade = start_facade(registry.clone(), shutdown.clone()).await;

    let alpha = http_get(facade, "alpha.test.local", "/").await;
    assert!(alpha.starts_with("HTTP/1.1 200"), "got: {alpha}");
    assert!(alpha.contains("served by alpha"));

    let beta = http_get(facade, "beta.test.local", "/").await;
    assert!(beta.contains("served by beta"));

    // Port in the Host header does not change the routing label.
    let with_port = http_get(facade, "alpha.test.local:8080", "/").await;
    assert!(with_port.contains("served by alpha"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_unknown_label_gets_404() {
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();
    let facade = start_facade(registry, shutdown.clone()).await;

    let response = http_get(facade, "ghost.test.local", "/").await;
    assert!(response.starts_with("HTTP/1.0 404"), "got: {response}");
    assert!(response.contains("Tunnel ghost not found"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_dotless_host_gets_400() {
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();

    // Even a session registered under the bare name must not be reachable
    // through a host without a label separator.
    let (_f, _t, _backend) = spawn_session(
        &registry,
        "localhost",
        SessionConfig::default(),
        Arc::new(NoopObserver),
    );

    let facade = start_facade(registry, shutdown.clone()).await;
    let response = http_get(facade, "localhost", "/").await;
    assert!(response.starts_with("HTTP/1.0 400"), "got: {response}");

    shutdown.cancel();
}

#[tokio::test]
async fn test_drained_session_answers_not_found() {
    use gatewire_core::forward::{Forwarder, ForwarderParams};
    use gatewire_core::transport::SessionTransport;

    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();

    // Run a session's control loop to completion without the usual cleanup
    // task, leaving a drained forwarder behind in the registry.
    let (transport, _backchannels) = super::MockTransport::new();
    let transport: Arc<dyn SessionTransport> = transport;
    let cancel = CancellationToken::new();
    let (_, forwarder) = registry
        .register_with(Some("alpha"), |id| {
            Forwarder::new(ForwarderParams {
                access_id: id.to_owned(),
                public_host: format!("{id}.test.local"),
                peer: "127.0.0.1:40000".parse().unwrap(),
                default_port: 2222,
                transport: Arc::clone(&transport),
                observer: Arc::new(NoopObserver),
                cancel: cancel.clone(),
                config: SessionConfig::default(),
            })
        })
        .unwrap();
    let serve = tokio::spawn(Arc::clone(&forwarder).serve());
    forwarder.begin_drain();
    serve.await.unwrap();
    assert!(registry.get("alpha").is_some());

    // The lookup hits but the hand-off fails; the caller still gets the
    // not-found answer instead of a silent hangup.
    let facade = start_facade(registry, shutdown.clone()).await;
    let response = http_get(facade, "alpha.test.local", "/").await;
    assert!(response.starts_with("HTTP/1.0 404"), "got: {response}");
    assert!(response.contains("Tunnel alpha not found"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();
    let facade = start_facade(registry, shutdown.clone()).await;

    let mut stream = tokio::net::TcpStream::connect(facade).await.unwrap();
    stream.write_all(b"\x00\x01garbage\r\n\r\n").await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.0 400"), "got: {response}");

    shutdown.cancel();
}
