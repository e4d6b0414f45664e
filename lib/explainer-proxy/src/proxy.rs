//! TCP pass-through proxy
//!
//! Every accepted connection gets its own backend connection and a task that
//! copies bytes both ways until both sides are done. Nothing is decrypted or
//! rewritten, so TLS between the real client and server passes through as is.

use std::net::SocketAddr;
use std::sync::Arc;

use explainer_core::{ExplainerError, ProxyEndpoints, Result};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::spy::{Connection, Listener, SpiedListener, TrafficObserver};

/// Transport the proxy listens on and dials with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Tcp,
}

impl Network {
    pub fn parse(network: &str) -> Result<Self> {
        match network {
            "tcp" => Ok(Network::Tcp),
            other => Err(ExplainerError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Where the proxy listens and where it forwards to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyRoute {
    pub listen: String,
    pub backend: String,
}

impl ProxyRoute {
    pub fn new(listen: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            backend: backend.into(),
        }
    }
}

impl From<&ProxyEndpoints> for ProxyRoute {
    fn from(endpoints: &ProxyEndpoints) -> Self {
        Self::new(endpoints.listen_addr(), endpoints.backend_addr())
    }
}

enum ProxyListener {
    Plain(TcpListener),
    Spied(SpiedListener<TcpListener>),
}

pub struct PassThroughProxy {
    listener: ProxyListener,
    backend: Arc<str>,
}

impl PassThroughProxy {
    /// Bind the listening side. With an observer, every accepted connection is spied on.
    pub async fn bind(
        network: &str,
        route: ProxyRoute,
        observer: Option<Arc<dyn TrafficObserver>>,
    ) -> Result<Self> {
        Network::parse(network)?;

        let listener = TcpListener::bind(&route.listen).await.map_err(|e| {
            ExplainerError::Connection(format!("Failed to bind {}: {}", route.listen, e))
        })?;
        let listener = match observer {
            Some(observer) => ProxyListener::Spied(SpiedListener::new(listener, observer)),
            None => ProxyListener::Plain(listener),
        };

        Ok(Self {
            listener,
            backend: route.backend.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = match &self.listener {
            ProxyListener::Plain(listener) => Listener::local_addr(listener)?,
            ProxyListener::Spied(listener) => listener.local_addr()?,
        };
        Ok(addr)
    }

    /// Relay connections until accepting fails
    pub async fn run(self) -> Result<()> {
        info!(
            "Proxying {} -> {}",
            self.local_addr()?,
            self.backend
        );
        match self.listener {
            ProxyListener::Plain(listener) => serve(listener, self.backend).await,
            ProxyListener::Spied(listener) => serve(listener, self.backend).await,
        }
    }
}

async fn serve<L: Listener>(listener: L, backend: Arc<str>) -> Result<()> {
    loop {
        let (inbound, peer) = listener
            .accept()
            .await
            .map_err(|e| ExplainerError::Connection(format!("Accept failed: {}", e)))?;
        debug!("Accepted proxy connection from {}", peer);
        tokio::spawn(relay(inbound, peer, backend.clone()));
    }
}

async fn relay<C: Connection>(mut inbound: C, peer: SocketAddr, backend: Arc<str>) {
    let mut outbound = match TcpStream::connect(&*backend).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to backend {} for {}: {}", backend, peer, e);
            return;
        }
    };

    match copy_bidirectional(&mut inbound, &mut outbound).await {
        Ok((to_backend, to_client)) => debug!(
            "Closed {} after {} bytes up, {} bytes down",
            peer, to_backend, to_client
        ),
        Err(e) => warn!("Relay for {} ended with error: {}", peer, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spy::Observation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    async fn echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut reader, mut writer) = stream.split();
                    tokio::io::copy(&mut reader, &mut writer).await.unwrap();
                    writer.shutdown().await.unwrap();
                });
            }
        });
        addr
    }

    async fn start_proxy(backend: SocketAddr, observer: Option<Arc<dyn TrafficObserver>>) -> SocketAddr {
        let route = ProxyRoute::new("127.0.0.1:0", backend.to_string());
        let proxy = PassThroughProxy::bind("tcp", route, observer).await.unwrap();
        let addr = proxy.local_addr().unwrap();
        tokio::spawn(proxy.run());
        addr
    }

    async fn round_trip(proxy: SocketAddr, payload: Vec<u8>) -> Vec<u8> {
        let stream = TcpStream::connect(proxy).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let sender = tokio::spawn(async move {
            writer.write_all(&payload).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let mut received = Vec::new();
        timeout(Duration::from_secs(10), reader.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        sender.await.unwrap();
        received
    }

    #[derive(Default)]
    struct ByteCounter {
        read: AtomicUsize,
        written: AtomicUsize,
    }

    impl TrafficObserver for ByteCounter {
        fn observe(&self, observation: &Observation<'_>) {
            match observation {
                Observation::Read { bytes } => {
                    self.read.fetch_add(bytes.len(), Ordering::SeqCst);
                }
                Observation::Write { bytes } => {
                    self.written.fetch_add(bytes.len(), Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_network_parse() {
        assert_eq!(Network::parse("tcp").unwrap(), Network::Tcp);
        for network in ["udp", "unix", "TCP", ""] {
            assert!(matches!(
                Network::parse(network),
                Err(ExplainerError::UnsupportedNetwork(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_unsupported_network() {
        let route = ProxyRoute::new("127.0.0.1:0", "127.0.0.1:1");
        let err = PassThroughProxy::bind("udp", route, None).await.err().unwrap();
        assert!(matches!(err, ExplainerError::UnsupportedNetwork(n) if n == "udp"));
    }

    #[tokio::test]
    async fn test_relays_small_payload() {
        let backend = echo_backend().await;
        let proxy = start_proxy(backend, None).await;

        let received = round_trip(proxy, b"Hello, world!".to_vec()).await;
        assert_eq!(received, b"Hello, world!");
    }

    #[tokio::test]
    async fn test_relays_large_payload_through_spy() {
        let backend = echo_backend().await;
        let counter = Arc::new(ByteCounter::default());
        let proxy = start_proxy(backend, Some(counter.clone())).await;

        let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let received = round_trip(proxy, payload.clone()).await;
        assert_eq!(received.len(), payload.len());
        assert!(received == payload);

        // The spy sits on the client leg: it read the request and wrote the echo
        assert_eq!(counter.read.load(Ordering::SeqCst), payload.len());
        assert_eq!(counter.written.load(Ordering::SeqCst), payload.len());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_isolated() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_backend = unused.local_addr().unwrap();
        drop(unused);
        let proxy = start_proxy(dead_backend, None).await;

        for _ in 0..2 {
            let mut stream = TcpStream::connect(proxy).await.unwrap();
            let mut buf = Vec::new();
            let read = timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
                .await
                .unwrap();
            // Closed without data, possibly with a reset
            assert!(read.map(|n| n == 0).unwrap_or(true));
        }
    }

    #[test]
    fn test_route_from_endpoints() {
        let endpoints = ProxyEndpoints::default();
        let route = ProxyRoute::from(&endpoints);
        assert_eq!(route.listen, endpoints.listen_addr());
        assert_eq!(route.backend, endpoints.backend_addr());
    }
}
