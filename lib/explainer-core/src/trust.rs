//! Root certificate trust store shared by the server and client TLS configurations

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use rustls_pemfile::certs;
use tracing::{debug, info, warn};

use crate::{ExplainerError, Result};

/// Verification pool built from one or more PEM-encoded root certificates.
///
/// Immutable once built. Cloning shares the underlying pool.
#[derive(Clone, Debug)]
pub struct TrustStore {
    roots: Arc<RootCertStore>,
}

impl TrustStore {
    /// Read `path` and add every parsable certificate block to a new pool.
    ///
    /// Only an unreadable file is an error. A file without usable
    /// certificates produces an empty pool, and handshakes relying on it
    /// will fail later.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| ExplainerError::CertificateLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let store = Self::from_pem(&pem);
        info!(
            "Trust store loaded {} root certificate(s) from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Build a pool from in-memory PEM data
    pub fn from_pem(pem: &[u8]) -> Self {
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(parse_certificates(pem));

        if ignored > 0 {
            warn!("Ignored {} certificate(s) that are not valid trust anchors", ignored);
        }
        if added == 0 {
            warn!("No trusted root certificates found in PEM data");
        }
        debug!("Trust store holds {} root certificate(s)", added);

        Self {
            roots: Arc::new(roots),
        }
    }

    /// Number of trust anchors in the pool
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// True when the pool holds no trust anchors
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Shared handle to the underlying rustls pool
    pub fn roots(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }
}

/// Collect certificate blocks from PEM data, skipping malformed blocks
fn parse_certificates(pem: &[u8]) -> Vec<CertificateDer<'static>> {
    let mut reader = BufReader::new(pem);
    let mut parsed = Vec::new();
    for item in certs(&mut reader) {
        match item {
            Ok(cert) => parsed.push(cert),
            // The reader has already moved past the bad block
            Err(e) => warn!("Skipping malformed PEM block: {}", e),
        }
    }
    parsed
}
