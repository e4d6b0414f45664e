//! Decorators that report the bytes crossing a connection
//!
//! [`SpiedConn`] and [`SpiedListener`] implement the same traits as the
//! values they wrap and hand every result back untouched. Each successful
//! read or write is passed to a [`TrafficObserver`] first.

use std::any::type_name;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use explainer_core::{ExplainerError, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::transcript::{format_line, Direction};

/// A bidirectional byte stream with known endpoints
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Connection for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Source of inbound connections
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Conn: Connection;

    async fn accept(&self) -> io::Result<(Self::Conn, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// One event seen by a spy
#[derive(Debug, PartialEq, Eq)]
pub enum Observation<'a> {
    Read { bytes: &'a [u8] },
    ReadFailed { error: String },
    Write { bytes: &'a [u8] },
    WriteFailed { error: String },
    Accepted { kind: &'static str, peer: SocketAddr },
}

/// Sink for spy observations. Called inline from I/O polling, so it must not block for long.
pub trait TrafficObserver: Send + Sync {
    fn observe(&self, observation: &Observation<'_>);
}

/// Connection wrapper that reports its traffic
pub struct SpiedConn<C> {
    inner: C,
    observer: Arc<dyn TrafficObserver>,
}

impl<C> SpiedConn<C> {
    pub fn new(inner: C, observer: Arc<dyn TrafficObserver>) -> Self {
        Self { inner, observer }
    }
}

impl<C: AsyncRead + Unpin> AsyncRead for SpiedConn<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let filled_before = buf.filled().len();
        let had_room = buf.remaining() > 0;
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let bytes = &buf.filled()[filled_before..];
                if bytes.is_empty() && had_room {
                    this.observer.observe(&Observation::ReadFailed {
                        error: "EOF".to_string(),
                    });
                } else {
                    this.observer.observe(&Observation::Read { bytes });
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.observer.observe(&Observation::ReadFailed {
                    error: e.to_string(),
                });
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for SpiedConn<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                this.observer.observe(&Observation::Write {
                    bytes: &buf[..written],
                });
                Poll::Ready(Ok(written))
            }
            Poll::Ready(Err(e)) => {
                this.observer.observe(&Observation::WriteFailed {
                    error: e.to_string(),
                });
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<C: Connection> Connection for SpiedConn<C> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

/// Listener wrapper that spies on every connection it accepts
pub struct SpiedListener<L> {
    inner: L,
    observer: Arc<dyn TrafficObserver>,
}

impl<L> SpiedListener<L> {
    pub fn new(inner: L, observer: Arc<dyn TrafficObserver>) -> Self {
        Self { inner, observer }
    }
}

#[async_trait]
impl<L: Listener> Listener for SpiedListener<L> {
    type Conn = SpiedConn<L::Conn>;

    async fn accept(&self) -> io::Result<(Self::Conn, SocketAddr)> {
        let (conn, peer) = self.inner.accept().await?;
        self.observer.observe(&Observation::Accepted {
            kind: type_name::<L::Conn>(),
            peer,
        });
        Ok((SpiedConn::new(conn, self.observer.clone()), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Reports observations as `tracing` events, payloads hex encoded
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl TrafficObserver for TracingObserver {
    fn observe(&self, observation: &Observation<'_>) {
        match observation {
            Observation::Read { bytes } => {
                info!(size = bytes.len(), payload = %hex::encode(bytes), "Read");
            }
            Observation::Write { bytes } => {
                info!(size = bytes.len(), payload = %hex::encode(bytes), "Write");
            }
            Observation::ReadFailed { error } => info!("Read failed: {}", error),
            Observation::WriteFailed { error } => info!("Write failed: {}", error),
            Observation::Accepted { kind, peer } => info!("Accepted {} from {}", kind, peer),
        }
    }
}

/// Appends successful reads and writes to a transcript file, one `Verb|size|hex` line each.
/// Connections sharing one observer interleave their lines.
pub struct TranscriptObserver {
    file: Mutex<LineWriter<File>>,
}

impl TranscriptObserver {
    /// Create or truncate the transcript at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                ExplainerError::InvalidConfiguration(format!(
                    "Cannot open transcript {}: {}",
                    path.display(),
                    e
                ))
            })?;
        debug!("Writing traffic transcript to {}", path.display());
        Ok(Self {
            file: Mutex::new(LineWriter::new(file)),
        })
    }

    fn append(&self, direction: Direction, bytes: &[u8]) {
        let line = format_line(direction, bytes);
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write transcript line: {}", e);
        }
    }
}

impl TrafficObserver for TranscriptObserver {
    fn observe(&self, observation: &Observation<'_>) {
        match observation {
            Observation::Read { bytes } => self.append(Direction::Read, bytes),
            Observation::Write { bytes } => self.append(Direction::Write, bytes),
            other => debug!("Not transcribed: {:?}", other),
        }
    }
}
