use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use explainer_core::config::{ServerEndpoint, DEFAULT_SERVER_HOSTNAME, DEFAULT_SERVER_PORT};
use explainer_core::{Identity, TlsPaths, TrustStore};
use explainer_tls::{ClientOptions, MutualTlsClient, HELLO_PATH};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Send one request to the mTLS server and print the response body
#[derive(Parser, Debug)]
#[command(name = "mtls-client", version, about, long_about = None)]
struct Args {
    /// PEM file with the root CA(s) the server certificate must chain to
    root_ca: PathBuf,

    /// PEM client certificate chain; omit to connect without one
    #[arg(requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key for the client certificate
    #[arg(requires = "cert")]
    key: Option<PathBuf>,

    #[arg(long, env = "MTLS_SERVER_HOSTNAME", default_value = DEFAULT_SERVER_HOSTNAME)]
    hostname: String,

    #[arg(long, env = "MTLS_SERVER_PORT", default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Use a fixed byte stream instead of system randomness (INSECURE, for reproducible captures)
    #[arg(long)]
    deterministic_random: bool,

    /// Write (truncating) TLS secrets to this file for packet capture decryption
    #[arg(long, env = "SSLKEYLOGFILE")]
    key_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let paths = TlsPaths::resolve(&args.root_ca, args.cert.as_deref(), args.key.as_deref())
        .context("Invalid certificate paths")?;

    let trust = TrustStore::load(&paths.root_ca).context("Failed to load root CA")?;
    let identity = match &paths.identity {
        Some(identity) => Some(
            Identity::load(&identity.cert, &identity.key)
                .context("Failed to load client identity")?,
        ),
        None => {
            info!("No client certificate given, connecting anonymously");
            None
        }
    };

    let options = ClientOptions {
        deterministic_random: args.deterministic_random,
        key_log: args.key_log,
    };
    let client = MutualTlsClient::new(&trust, identity.as_ref(), &options)?;

    let url = ServerEndpoint::new(args.hostname, args.port).url(HELLO_PATH);
    let body = client.request(&url).await.context("Request failed")?;
    println!("Received: {:?}", String::from_utf8_lossy(&body));
    Ok(())
}
