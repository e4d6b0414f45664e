//! Certificate + private key pair presented by a TLS endpoint

use std::fmt;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, read_all, Item};
use tracing::debug;

use crate::{ExplainerError, Result};

/// Certificate chain and matching private key.
///
/// The key never appears in `Debug` output.
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Load an identity from a certificate PEM file and a private key PEM file
    pub fn load(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let cert_pem = read_pem_file(cert_path)?;
        let key_pem = read_pem_file(key_path)?;

        let cert_chain = parse_cert_chain(&cert_pem).map_err(|e| e.with_path(cert_path))?;
        let key = parse_private_key(&key_pem).map_err(|e| e.with_path(key_path))?;

        debug!(
            "Loaded identity with {} certificate(s) from {}",
            cert_chain.len(),
            cert_path.display()
        );
        Ok(Self { cert_chain, key })
    }

    /// Build an identity from in-memory PEM data
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        Ok(Self {
            cert_chain: parse_cert_chain(cert_pem)?,
            key: parse_private_key(key_pem)?,
        })
    }

    /// Owned copies of the chain and key, as rustls config builders expect
    pub fn to_parts(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.cert_chain.clone(), self.key.clone_key())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificates", &self.cert_chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

fn read_pem_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| ExplainerError::CertificateLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn parse_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    let chain = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ExplainerError::pem(format!("Failed to parse certificates: {}", e)))?;

    if chain.is_empty() {
        return Err(ExplainerError::pem("No certificates found in PEM data"));
    }
    Ok(chain)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem);
    let items: Vec<_> = read_all(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ExplainerError::pem(format!("Failed to parse private key: {}", e)))?;

    // First key wins
    for item in items {
        match item {
            Item::Pkcs8Key(k) => return Ok(PrivateKeyDer::Pkcs8(k)),
            Item::Pkcs1Key(k) => return Ok(PrivateKeyDer::Pkcs1(k)),
            Item::Sec1Key(k) => return Ok(PrivateKeyDer::Sec1(k)),
            _ => {}
        }
    }
    Err(ExplainerError::pem("No private key found in PEM data"))
}
