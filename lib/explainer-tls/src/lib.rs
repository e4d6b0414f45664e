//! Mutual TLS over HTTP/1.1
//!
//! This library provides:
//! - rustls server/client configuration built from a shared trust store
//! - A one-shot, causally ordered shutdown signal
//! - An HTTPS server that requires client certificates and stops itself
//!   after serving its first request
//! - A single-request HTTPS client

pub mod client;
pub mod handler;
pub mod server;
pub mod shutdown;
pub mod tls;

pub use client::{ClientOptions, MutualTlsClient};
pub use handler::{HelloHandler, RequestHandler, ShutdownTrigger, HELLO_BODY, HELLO_PATH};
pub use server::{MutualTlsServer, ServerState};
pub use shutdown::{Latch, ShutdownSignal};
pub use tls::{build_client_config, build_server_config, ClientAuthMode};

#[cfg(test)]
pub(crate) mod testing;
