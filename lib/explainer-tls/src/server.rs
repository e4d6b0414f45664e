//! HTTPS server that requires client certificates and shuts itself down
//! after serving its first request.
//!
//! Shutdown runs in two stages. The wrapped handler sets the `begin` latch
//! of the [`ShutdownSignal`] once it has produced its first response. A
//! background task waiting on that latch stops the accept loop, asks every
//! open connection to finish its in-flight request and close, waits until
//! the last one is gone and then sets `complete`. `serve` returns only after
//! it has observed `complete`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use explainer_core::{ExplainerError, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::handler::{text_response, RequestHandler, ShutdownTrigger};
use crate::shutdown::ShutdownSignal;

/// Lifecycle of a [`MutualTlsServer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    ShutdownRequested,
    Draining,
    Stopped,
}

/// The single path the server answers, with its shutdown-triggering handler
struct Route {
    path: String,
    handler: ShutdownTrigger,
}

impl Route {
    async fn dispatch(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        if request.uri().path() != self.path {
            debug!("No handler for {}", request.uri().path());
            return text_response(StatusCode::NOT_FOUND, "404 page not found\n");
        }

        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return text_response(StatusCode::BAD_REQUEST, "failed to read request body\n");
            }
        };
        self.handler.handle(Request::from_parts(parts, body)).await
    }
}

/// mTLS HTTPS server bound to a listening socket
pub struct MutualTlsServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    route: Arc<Route>,
    signal: Arc<ShutdownSignal>,
    state: watch::Sender<ServerState>,
}

impl MutualTlsServer {
    /// Bind `addr` and register `handler` for `path`
    pub async fn bind(
        addr: &str,
        tls: Arc<ServerConfig>,
        path: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ExplainerError::Connection(format!("Failed to bind {}: {}", addr, e))
        })?;

        let signal = Arc::new(ShutdownSignal::new());
        let route = Route {
            path: path.into(),
            handler: ShutdownTrigger::new(handler, signal.clone()),
        };
        let (state, _) = watch::channel(ServerState::Idle);

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            route: Arc::new(route),
            signal,
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for requesting shutdown from outside (e.g. on Ctrl-C)
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.signal.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Accept connections until shutdown completes
    pub async fn serve(self) -> Result<()> {
        let Self {
            listener,
            acceptor,
            route,
            signal,
            state,
        } = self;
        let state = Arc::new(state);
        let local_addr = listener.local_addr()?;

        let (drain_tx, drain_rx) = watch::channel(false);
        // Every connection task holds a sender; the receiver sees `None` once they are all gone
        let (active_tx, active_rx) = mpsc::channel::<()>(1);

        state.send_replace(ServerState::Listening);
        info!("mTLS server listening on {}", local_addr);

        let shutdown_task = tokio::spawn(shutdown_when_requested(
            signal.clone(),
            state.clone(),
            drain_tx,
            active_rx,
        ));

        let mut stop = drain_rx.clone();
        loop {
            tokio::select! {
                _ = async { let _ = stop.wait_for(|draining| *draining).await; } => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        tokio::spawn(serve_connection(
                            acceptor.clone(),
                            stream,
                            peer,
                            route.clone(),
                            drain_rx.clone(),
                            active_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        drop(listener);
        drop(active_tx);
        info!("Stopped accepting connections on {}", local_addr);

        match shutdown_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(ExplainerError::Shutdown(format!("shutdown task failed: {}", e)))
            }
        }
        signal.completed().await;

        info!("mTLS server stopped");
        Ok(())
    }
}

async fn shutdown_when_requested(
    signal: Arc<ShutdownSignal>,
    state: Arc<watch::Sender<ServerState>>,
    drain: watch::Sender<bool>,
    mut active: mpsc::Receiver<()>,
) -> Result<()> {
    signal.requested().await;
    state.send_replace(ServerState::ShutdownRequested);

    drain.send_replace(true);
    state.send_replace(ServerState::Draining);
    info!("Draining open connections");

    // Nothing is ever sent; this returns once every connection has finished
    let _ = active.recv().await;

    state.send_replace(ServerState::Stopped);
    signal.mark_complete()
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    route: Arc<Route>,
    mut drain: watch::Receiver<bool>,
    _active: mpsc::Sender<()>,
) {
    let tls_stream = tokio::select! {
        handshake = acceptor.accept(stream) => match handshake {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                let err = ExplainerError::Handshake(e.to_string());
                warn!("Rejected connection from {}: {}", peer, err);
                return;
            }
        },
        _ = drain.wait_for(|draining| *draining) => {
            debug!("Dropping handshake from {} during shutdown", peer);
            return;
        }
    };

    if let Some(certs) = tls_stream.get_ref().1.peer_certificates() {
        debug!("Client {} presented {} certificate(s)", peer, certs.len());
    }

    let service = service_fn(move |request| {
        let route = route.clone();
        async move { Ok::<_, Infallible>(route.dispatch(request).await) }
    });
    let connection = http1::Builder::new().serve_connection(TokioIo::new(tls_stream), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!("Error serving connection from {}: {}", peer, e);
                }
                break;
            }
            _ = drain.wait_for(|draining| *draining), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
    debug!("Connection from {} closed", peer);
}
