//! Shared building blocks for the mTLS explainer
//!
//! This library provides:
//! - Trust store loading from PEM-encoded root certificates
//! - Certificate/key identity loading
//! - A deterministic (insecure) randomness source and key-log sink for
//!   reproducible handshakes
//! - Configuration values consumed by the server, client and proxy

pub mod config;
pub mod error;
pub mod identity;
pub mod keylog;
pub mod random;
pub mod trust;

pub use config::{ProxyEndpoints, ServerEndpoint, TlsPaths};
pub use error::{ExplainerError, Result};
pub use identity::Identity;
pub use keylog::KeyLogWriter;
pub use random::{deterministic_provider, FixedByteSource};
pub use trust::TrustStore;

use std::sync::Arc;

use rustls::crypto::CryptoProvider;

/// The crypto provider every TLS configuration in this workspace is built with.
pub fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
