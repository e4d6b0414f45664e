use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExplainerError>;

#[derive(Error, Debug)]
pub enum ExplainerError {
    #[error("Failed to load certificate material from {path}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to read response body: {0}")]
    Read(String),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),

    #[error("Unsupported network {0:?}, only \"tcp\" is supported")]
    UnsupportedNetwork(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid transcript line {line}: {reason}")]
    InvalidTranscript { line: usize, reason: String },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExplainerError {
    /// Build a certificate load error for in-memory PEM data
    pub fn pem(reason: impl Into<String>) -> Self {
        ExplainerError::CertificateLoad {
            path: PathBuf::from("<memory>"),
            reason: reason.into(),
        }
    }

    /// Attach a file path to a certificate load error raised while parsing
    pub(crate) fn with_path(self, path: &std::path::Path) -> Self {
        match self {
            ExplainerError::CertificateLoad { reason, .. } => ExplainerError::CertificateLoad {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        }
    }
}
