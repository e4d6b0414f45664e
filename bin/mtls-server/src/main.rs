use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use explainer_core::config::{join_host_port, DEFAULT_SERVER_PORT};
use explainer_core::{Identity, TlsPaths, TrustStore};
use explainer_tls::{build_server_config, ClientAuthMode, HelloHandler, MutualTlsServer, HELLO_PATH};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// HTTPS server that requires a client certificate, answers one request and exits
#[derive(Parser, Debug)]
#[command(name = "mtls-server", version, about, long_about = None)]
struct Args {
    /// PEM file with the root CA(s) client certificates must chain to
    root_ca: PathBuf,

    /// PEM certificate chain presented by the server
    cert: PathBuf,

    /// PEM private key for the server certificate
    key: PathBuf,

    /// Host to listen on (empty for all interfaces)
    #[arg(long, env = "MTLS_SERVER_HOSTNAME", default_value = "")]
    hostname: String,

    #[arg(long, env = "MTLS_SERVER_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Client certificate policy: required, optional or none
    #[arg(long, default_value = "required")]
    client_auth: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let paths = TlsPaths::resolve(&args.root_ca, Some(args.cert.as_path()), Some(args.key.as_path()))
        .context("Invalid certificate paths")?;
    let identity_paths = paths.require_identity()?;

    let trust = TrustStore::load(&paths.root_ca).context("Failed to load root CA")?;
    let identity = Identity::load(&identity_paths.cert, &identity_paths.key)
        .context("Failed to load server identity")?;
    info!("Loaded {} trusted root(s) from {}", trust.len(), paths.root_ca.display());

    let mode = ClientAuthMode::from_string(&args.client_auth);
    let tls = build_server_config(&identity, &trust, mode)?;

    let addr = join_host_port(&args.hostname, args.port);
    let server = MutualTlsServer::bind(&addr, tls, HELLO_PATH, Arc::new(HelloHandler)).await?;

    let signal = server.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            signal.request_shutdown();
        }
    });

    server.serve().await.context("Server failed")?;
    Ok(())
}
