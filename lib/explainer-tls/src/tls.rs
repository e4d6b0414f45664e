//! rustls configuration for the server and client sides of mutual TLS

use std::sync::Arc;

use explainer_core::{
    default_provider, deterministic_provider, ExplainerError, Identity, KeyLogWriter, Result,
    TrustStore,
};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig};
use tracing::{debug, info, warn};

use crate::client::ClientOptions;

/// Client authentication mode for incoming TLS connections
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ClientAuthMode {
    /// No client certificate requested
    NoClientAuth,
    /// Client certificate verified if presented
    Optional,
    /// Client certificate required and verified
    #[default]
    Required,
}

impl ClientAuthMode {
    /// Parse client auth mode from string
    pub fn from_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => ClientAuthMode::NoClientAuth,
            "optional" => ClientAuthMode::Optional,
            _ => ClientAuthMode::Required,
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, ClientAuthMode::Required)
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, ClientAuthMode::NoClientAuth)
    }
}

/// Build the server configuration: `identity` is presented, client
/// certificates are verified against `trust` according to `mode`.
pub fn build_server_config(
    identity: &Identity,
    trust: &TrustStore,
    mode: ClientAuthMode,
) -> Result<Arc<ServerConfig>> {
    let provider = default_provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = if mode.is_enabled() {
        if trust.is_empty() {
            return Err(ExplainerError::InvalidConfiguration(
                "client certificate verification needs at least one trusted root".to_string(),
            ));
        }

        let verifier = WebPkiClientVerifier::builder_with_provider(trust.roots(), provider);
        let verifier = if mode.is_required() {
            verifier
        } else {
            verifier.allow_unauthenticated()
        };
        let verifier = verifier.build().map_err(|e| {
            ExplainerError::InvalidConfiguration(format!(
                "Failed to create client certificate verifier: {}",
                e
            ))
        })?;
        builder.with_client_cert_verifier(verifier)
    } else {
        warn!("Client certificates are not requested, mutual authentication is disabled");
        builder.with_no_client_auth()
    };

    let (chain, key) = identity.to_parts();
    let config = builder.with_single_cert(chain, key)?;

    info!("Server TLS configuration created with client auth: {:?}", mode);
    Ok(Arc::new(config))
}

/// Build the client configuration: the server is verified against `trust`
/// and `identity` is presented when given.
pub fn build_client_config(
    trust: &TrustStore,
    identity: Option<&Identity>,
    options: &ClientOptions,
) -> Result<Arc<ClientConfig>> {
    let provider = if options.deterministic_random {
        warn!("Using a fixed randomness source for TLS, this is INSECURE");
        deterministic_provider()
    } else {
        default_provider()
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(trust.roots());

    let mut config = match identity {
        Some(identity) => {
            let (chain, key) = identity.to_parts();
            debug!("Presenting client certificate chain of {} certificate(s)", chain.len());
            builder.with_client_auth_cert(chain, key)?
        }
        None => {
            debug!("No client certificate configured");
            builder.with_no_client_auth()
        }
    };

    if let Some(path) = &options.key_log {
        config.key_log = Arc::new(KeyLogWriter::create(path)?);
    }

    Ok(Arc::new(config))
}
