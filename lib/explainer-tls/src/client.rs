//! Single-request HTTPS client that verifies the server and can present a
//! client certificate

use std::path::PathBuf;

use explainer_core::{ExplainerError, Identity, Result, TrustStore};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::tls::build_client_config;

/// Observability switches for the client handshake. None of them change
/// whether a handshake succeeds.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Replace TLS randomness with a fixed byte stream (INSECURE, testing only)
    pub deterministic_random: bool,
    /// Write handshake secrets to this file in key log format
    pub key_log: Option<PathBuf>,
}

/// HTTPS client. Every request opens, uses and drops its own connection.
pub struct MutualTlsClient {
    connector: TlsConnector,
}

impl MutualTlsClient {
    pub fn new(
        trust: &TrustStore,
        identity: Option<&Identity>,
        options: &ClientOptions,
    ) -> Result<Self> {
        let config = build_client_config(trust, identity, options)?;
        Ok(Self {
            connector: TlsConnector::from(config),
        })
    }

    /// GET `url` and return the full response body, whatever the status
    pub async fn request(&self, url: &str) -> Result<Bytes> {
        let target = Target::parse(url)?;
        debug!("Connecting to {}", target.authority);

        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| {
                ExplainerError::Connection(format!(
                    "Failed to connect to {}: {}",
                    target.authority, e
                ))
            })?;

        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            ExplainerError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let tls = self.connector.connect(server_name, tcp).await.map_err(|e| {
            ExplainerError::Connection(format!(
                "TLS handshake with {} failed: {}",
                target.authority, e
            ))
        })?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| ExplainerError::Connection(format!("HTTP handshake failed: {}", e)))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Client connection closed with error: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(target.path_and_query.as_str())
            .header(HOST, target.authority.as_str())
            .body(Empty::<Bytes>::new())
            .map_err(|e| ExplainerError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        // Under TLS 1.3 a rejected client certificate surfaces here, not in the handshake
        let response = sender.send_request(request).await.map_err(|e| {
            ExplainerError::Connection(format!("Request to {} failed: {}", url, e))
        })?;
        info!("{} responded with {}", url, response.status());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ExplainerError::Read(e.to_string()))?
            .to_bytes();
        debug!("Received {} byte body", body.len());
        Ok(body)
    }
}

/// The parts of an `https://` URL needed to dial and address a request
#[derive(Debug, PartialEq)]
struct Target {
    host: String,
    port: u16,
    authority: String,
    path_and_query: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| ExplainerError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri = url.parse::<Uri>().map_err(|e| invalid(&e.to_string()))?;
        if uri.scheme_str() != Some("https") {
            return Err(invalid("scheme must be https"));
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host,
            port: authority.port_u16().unwrap_or(443),
            authority: authority.as_str().to_string(),
            path_and_query: uri
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let target = Target::parse("https://localhost:8443/hello").unwrap();
        assert_eq!(
            target,
            Target {
                host: "localhost".to_string(),
                port: 8443,
                authority: "localhost:8443".to_string(),
                path_and_query: "/hello".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_target_defaults() {
        let target = Target::parse("https://example.com").unwrap();
        assert_eq!(target.port, 443);
        assert_eq!(target.path_and_query, "/");
    }

    #[test]
    fn test_parse_target_ipv6() {
        let target = Target::parse("https://[::1]:8443/hello?x=1").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.authority, "[::1]:8443");
        assert_eq!(target.path_and_query, "/hello?x=1");
    }

    #[test]
    fn test_parse_target_rejects_plain_http() {
        let err = Target::parse("http://localhost:8080/hello").unwrap_err();
        assert!(err.to_string().contains("scheme must be https"));
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(matches!(
            Target::parse("not a url"),
            Err(ExplainerError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pki = crate::testing::Pki::new();
        let client = MutualTlsClient::new(&pki.trust_store(), None, &ClientOptions::default())
            .unwrap();
        let err = client
            .request(&format!("https://127.0.0.1:{}/hello", port))
            .await
            .unwrap_err();
        assert!(matches!(err, ExplainerError::Connection(_)));
    }
}
