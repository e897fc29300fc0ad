use anyhow::{Context, Result};
use clap::Parser;
use gatewire_common::GatewayConfig;
use gatewire_core::IdentityConfig;
use gatewire_core::IdentityDirectory;
use gatewire_http::PublicFacade;
use gatewire_ssh::GatewayServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod diagnostic;
mod observer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SSH session listener address
    #[arg(long, default_value = "0.0.0.0:2222", env = "GATEWIRE_SSH_BIND")]
    ssh_bind: SocketAddr,

    /// Public HTTP facade listener address
    #[arg(long, default_value = "0.0.0.0:8080", env = "GATEWIRE_FACADE_BIND")]
    facade_bind: SocketAddr,

    /// Domain suffix under which access ids are published
    #[arg(long, env = "GATEWIRE_DOMAIN")]
    domain: String,

    /// Direct-connect port reserved for the diagnostic sink
    #[arg(long, default_value_t = 4300, env = "GATEWIRE_DIAGNOSTIC_PORT")]
    diagnostic_port: u16,

    /// JSON file mapping credentials to aliases
    #[arg(long, env = "GATEWIRE_IDENTITIES")]
    identities: Option<PathBuf>,

    /// Host key file (OpenSSH secret key); ephemeral if absent
    #[arg(long, env = "GATEWIRE_HOST_KEY")]
    host_key: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

fn load_identities(path: Option<&PathBuf>) -> Result<IdentityDirectory> {
    let Some(path) = path else {
        return Ok(IdentityDirectory::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading identities from {}", path.display()))?;
    let config: IdentityConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing identities from {}", path.display()))?;
    Ok(IdentityDirectory::build(&config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "gatewire_server={},gatewire_core={},gatewire_http={},gatewire_ssh={}",
            args.log_level, args.log_level, args.log_level, args.log_level
        ))
        .init();

    info!("Starting Gatewire v{}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::for_domain(args.domain.clone())?;
    config.ssh_bind = args.ssh_bind;
    config.facade_bind = args.facade_bind;
    config.diagnostic_port = args.diagnostic_port;

    let identities = load_identities(args.identities.as_ref())?;
    if identities.is_empty() {
        info!("no identities configured; all sessions register anonymously");
    }

    let registry = gatewire_core::SessionRegistry::new();

    let mut builder = GatewayServer::builder(config.clone())
        .registry(registry.clone())
        .identities(identities)
        .observer(Arc::new(observer::LogObserver))
        .diagnostics(Arc::new(diagnostic::StatsReport::new(registry.clone())));

    if let Some(path) = &args.host_key {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("reading host key from {}", path.display()))?;
        builder = builder.host_key(pem);
    }

    let server = builder.build();
    let shutdown = server.shutdown_token();

    let facade = PublicFacade::with_config(
        config.facade_bind,
        registry,
        shutdown.clone(),
        config.facade.clone(),
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        }
    });

    info!("public facade on {}", config.facade_bind);
    tokio::try_join!(server.run(), facade.run())?;

    Ok(())
}
