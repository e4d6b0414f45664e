//! Validated configuration values handed to the server, client and proxy.
//!
//! The binaries gather these from command-line arguments and environment
//! variables; the libraries only ever see the validated structures.

use std::path::{Path, PathBuf};

use crate::{ExplainerError, Result};

pub const DEFAULT_SERVER_HOSTNAME: &str = "localhost";
pub const DEFAULT_SERVER_PORT: u16 = 8443;
pub const DEFAULT_PROXY_HOSTNAME: &str = "";
pub const DEFAULT_PROXY_PORT: u16 = 9090;
pub const DEFAULT_PROXIED_HOSTNAME: &str = "localhost";
pub const DEFAULT_PROXIED_PORT: u16 = 8080;

/// Certificate and key file pair for one endpoint
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Absolute paths to the PEM material an endpoint needs
#[derive(Clone, Debug, PartialEq)]
pub struct TlsPaths {
    /// Root CA bundle used to verify the peer
    pub root_ca: PathBuf,
    /// Certificate/key presented to the peer, if any
    pub identity: Option<IdentityPaths>,
}

impl TlsPaths {
    /// Resolve and check paths. `cert` and `key` must be given together.
    pub fn resolve(root_ca: &Path, cert: Option<&Path>, key: Option<&Path>) -> Result<Self> {
        let root_ca = absolute_existing(root_ca)?;
        let identity = match (cert, key) {
            (Some(cert), Some(key)) => Some(IdentityPaths {
                cert: absolute_existing(cert)?,
                key: absolute_existing(key)?,
            }),
            (None, None) => None,
            _ => {
                return Err(ExplainerError::InvalidConfiguration(
                    "certificate and key paths must be provided together".to_string(),
                ))
            }
        };
        Ok(Self { root_ca, identity })
    }

    /// The identity paths, for endpoints that cannot run without one
    pub fn require_identity(&self) -> Result<&IdentityPaths> {
        self.identity.as_ref().ok_or_else(|| {
            ExplainerError::InvalidConfiguration(
                "a certificate and key are required".to_string(),
            )
        })
    }
}

fn absolute_existing(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    if !absolute.is_file() {
        return Err(ExplainerError::InvalidConfiguration(format!(
            "{} does not exist or is not a file",
            absolute.display()
        )));
    }
    Ok(absolute)
}

/// Join a host and port, bracketing IPv6 literals.
///
/// An empty host means all IPv4 interfaces (`0.0.0.0`). Pass `::` explicitly
/// to listen on IPv6; hosts with IPv6 disabled cannot bind `[::]`.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.is_empty() {
        format!("0.0.0.0:{}", port)
    } else if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Where the mTLS server listens and the client dials
#[derive(Clone, Debug, PartialEq)]
pub struct ServerEndpoint {
    pub hostname: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        join_host_port(&self.hostname, self.port)
    }

    /// HTTPS URL for `path` on this endpoint
    pub fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.addr(), path)
    }
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_HOSTNAME, DEFAULT_SERVER_PORT)
    }
}

/// Listen and backend addresses for the pass-through proxy
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyEndpoints {
    pub listen_host: String,
    pub listen_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
}

impl ProxyEndpoints {
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.listen_host, self.listen_port)
    }

    pub fn backend_addr(&self) -> String {
        join_host_port(&self.backend_host, self.backend_port)
    }
}

impl Default for ProxyEndpoints {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_PROXY_HOSTNAME.to_string(),
            listen_port: DEFAULT_PROXY_PORT,
            backend_host: DEFAULT_PROXIED_HOSTNAME.to_string(),
            backend_port: DEFAULT_PROXIED_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("localhost", 8443), "localhost:8443");
        assert_eq!(join_host_port("", 9090), "0.0.0.0:9090");
        assert_eq!(join_host_port("::1", 8080), "[::1]:8080");
        assert_eq!(join_host_port("::", 9090), "[::]:9090");
        assert_eq!(join_host_port("[::1]", 8080), "[::1]:8080");
    }

    #[test]
    fn test_server_endpoint_defaults() {
        let endpoint = ServerEndpoint::default();
        assert_eq!(endpoint.addr(), "localhost:8443");
        assert_eq!(endpoint.url("/hello"), "https://localhost:8443/hello");
    }

    #[test]
    fn test_proxy_endpoint_defaults() {
        let endpoints = ProxyEndpoints::default();
        assert_eq!(endpoints.listen_addr(), "0.0.0.0:9090");
        assert_eq!(endpoints.backend_addr(), "localhost:8080");
    }

    #[test]
    fn test_resolve_makes_paths_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("rootCA-cert.pem");
        std::fs::write(&ca, "ca").unwrap();

        let paths = TlsPaths::resolve(&ca, None, None).unwrap();
        assert!(paths.root_ca.is_absolute());
        assert!(paths.identity.is_none());
        assert!(paths.require_identity().is_err());
    }

    #[test]
    fn test_resolve_with_identity() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("rootCA-cert.pem");
        let cert = dir.path().join("localhost-server-cert.pem");
        let key = dir.path().join("localhost-server-key.pem");
        for path in [&ca, &cert, &key] {
            std::fs::write(path, "pem").unwrap();
        }

        let paths = TlsPaths::resolve(&ca, Some(&cert), Some(&key)).unwrap();
        let identity = paths.require_identity().unwrap();
        assert_eq!(identity.cert, cert);
        assert_eq!(identity.key, key);
    }

    #[test]
    fn test_resolve_rejects_half_identity() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("rootCA-cert.pem");
        std::fs::write(&ca, "ca").unwrap();

        let err = TlsPaths::resolve(&ca, Some(&ca), None).unwrap_err();
        assert!(matches!(err, ExplainerError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_resolve_rejects_missing_file() {
        let err = TlsPaths::resolve(Path::new("/definitely/not/here.pem"), None, None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
