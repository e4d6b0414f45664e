use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use explainer_core::config::{
    DEFAULT_PROXIED_HOSTNAME, DEFAULT_PROXIED_PORT, DEFAULT_PROXY_HOSTNAME, DEFAULT_PROXY_PORT,
};
use explainer_core::ProxyEndpoints;
use explainer_proxy::{
    parse_transcript, PassThroughProxy, ProxyRoute, TracingObserver, TrafficObserver,
    TranscriptObserver,
};
use tracing_subscriber::EnvFilter;

/// Byte-level TCP proxy for watching TLS traffic on the wire
#[derive(Parser, Debug)]
#[command(name = "tcp-proxy", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward connections to the backend
    Run(RunArgs),
    /// Decode a transcript written with `run --transcript`
    Analyze {
        /// Transcript file
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Host to listen on (empty for all interfaces)
    #[arg(long, env = "PROXY_SERVER_HOSTNAME", default_value = DEFAULT_PROXY_HOSTNAME)]
    listen_host: String,

    #[arg(long, env = "PROXY_SERVER_PORT", default_value_t = DEFAULT_PROXY_PORT)]
    listen_port: u16,

    #[arg(long, env = "PROXIED_HOSTNAME", default_value = DEFAULT_PROXIED_HOSTNAME)]
    backend_host: String,

    #[arg(long, env = "PROXIED_PORT", default_value_t = DEFAULT_PROXIED_PORT)]
    backend_port: u16,

    /// Network type; only "tcp" is supported
    #[arg(long, default_value = "tcp")]
    network: String,

    /// Log every byte read from and written to clients
    #[arg(long)]
    spy: bool,

    /// Write client traffic to this file as `Verb|size|hex` lines
    #[arg(long, conflicts_with = "spy")]
    transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Analyze { file } => analyze(&file),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let endpoints = ProxyEndpoints {
        listen_host: args.listen_host,
        listen_port: args.listen_port,
        backend_host: args.backend_host,
        backend_port: args.backend_port,
    };

    let observer: Option<Arc<dyn TrafficObserver>> = match (&args.transcript, args.spy) {
        (Some(path), _) => Some(Arc::new(TranscriptObserver::create(path)?)),
        (None, true) => Some(Arc::new(TracingObserver)),
        (None, false) => None,
    };

    let proxy = PassThroughProxy::bind(&args.network, ProxyRoute::from(&endpoints), observer)
        .await
        .context("Failed to start proxy")?;
    proxy.run().await.context("Proxy stopped")?;
    Ok(())
}

fn analyze(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    for record in parse_transcript(&text)? {
        println!("{}", record.direction);
        println!("{}", record.escaped());
    }
    Ok(())
}
