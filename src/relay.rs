//! Bidirectional tunnel relay
//!
//! A [`TunnelSession`] owns one client socket and the upstream tunnel opened
//! for it, and splices bytes between them until either side closes, errors,
//! or the server shuts down. Both sockets are dropped when the relay returns.

use crate::server::Shutdown;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Relay buffer size per direction
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Identifier of one accepted client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte counters shared between a relay and whoever reports on it
#[derive(Debug, Default)]
pub struct TrafficCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl TrafficCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes received from the client
    pub fn add_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    /// Record bytes delivered to the client
    pub fn add_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    /// Bytes received from the client
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Bytes delivered to the client
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Zero both counters
    pub fn reset(&self) {
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
    }
}

/// Why a relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Client sent EOF
    ClientClosed,
    /// Upstream sent EOF
    UpstreamClosed,
    /// Reading from or writing to the client failed
    ClientError(io::ErrorKind),
    /// Reading from or writing to the upstream failed
    UpstreamError(io::ErrorKind),
    /// Server shutdown closed the session
    Shutdown,
}

impl RelayEnd {
    /// Whether the relay ended on a socket error rather than a close
    pub fn is_error(&self) -> bool {
        matches!(self, RelayEnd::ClientError(_) | RelayEnd::UpstreamError(_))
    }
}

impl fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEnd::ClientClosed => f.write_str("client closed"),
            RelayEnd::UpstreamClosed => f.write_str("upstream closed"),
            RelayEnd::ClientError(kind) => write!(f, "client error ({:?})", kind),
            RelayEnd::UpstreamError(kind) => write!(f, "upstream error ({:?})", kind),
            RelayEnd::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Outcome of a finished tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    /// Session this summary belongs to
    pub id: SessionId,
    /// Bytes received from the client and forwarded upstream
    pub bytes_in: u64,
    /// Bytes received from the upstream and forwarded to the client
    pub bytes_out: u64,
    /// Time from tunnel establishment to termination
    pub duration: Duration,
    /// Termination cause
    pub end: RelayEnd,
}

/// How one copy direction stopped
enum Halt {
    Eof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

/// One established client/upstream pairing
pub struct TunnelSession<C, U> {
    id: SessionId,
    client: C,
    upstream: U,
    started_at: Instant,
    pending: Bytes,
    counters: Arc<TrafficCounters>,
    totals: Option<Arc<TrafficCounters>>,
}

impl<C, U> TunnelSession<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    /// Pair a client socket with its established upstream tunnel
    pub fn new(id: SessionId, client: C, upstream: U) -> Self {
        TunnelSession {
            id,
            client,
            upstream,
            started_at: Instant::now(),
            pending: Bytes::new(),
            counters: Arc::new(TrafficCounters::new()),
            totals: None,
        }
    }

    /// Client bytes already read past the request head, sent upstream first
    pub fn with_pending(mut self, pending: impl Into<Bytes>) -> Self {
        self.pending = pending.into();
        self
    }

    /// Also account traffic into server-wide counters
    pub fn with_totals(mut self, totals: Arc<TrafficCounters>) -> Self {
        self.totals = Some(totals);
        self
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Live counters of this session
    pub fn counters(&self) -> Arc<TrafficCounters> {
        self.counters.clone()
    }

    /// Relay until one direction finishes or `shutdown` fires
    ///
    /// Each direction blocks only on its own read, so an idle direction never
    /// stalls the other. Both sockets are closed when this returns.
    pub async fn relay(self, mut shutdown: Shutdown) -> RelaySummary {
        let TunnelSession {
            id,
            client,
            mut upstream,
            started_at,
            pending,
            counters,
            totals,
        } = self;

        let record_in = |n: u64| {
            counters.add_in(n);
            if let Some(totals) = &totals {
                totals.add_in(n);
            }
        };
        let record_out = |n: u64| {
            counters.add_out(n);
            if let Some(totals) = &totals {
                totals.add_out(n);
            }
        };

        let end = 'relay: {
            if !pending.is_empty() {
                if let Err(e) = upstream.write_all(&pending).await {
                    break 'relay RelayEnd::UpstreamError(e.kind());
                }
                record_in(pending.len() as u64);
            }

            let (mut client_read, mut client_write) = tokio::io::split(client);
            let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

            let client_to_upstream = pump(&mut client_read, &mut upstream_write, &record_in);
            let upstream_to_client = pump(&mut upstream_read, &mut client_write, &record_out);

            tokio::select! {
                halt = client_to_upstream => match halt {
                    Halt::Eof => RelayEnd::ClientClosed,
                    Halt::ReadFailed(e) => RelayEnd::ClientError(e.kind()),
                    Halt::WriteFailed(e) => RelayEnd::UpstreamError(e.kind()),
                },
                halt = upstream_to_client => match halt {
                    Halt::Eof => RelayEnd::UpstreamClosed,
                    Halt::ReadFailed(e) => RelayEnd::UpstreamError(e.kind()),
                    Halt::WriteFailed(e) => RelayEnd::ClientError(e.kind()),
                },
                _ = shutdown.triggered() => RelayEnd::Shutdown,
            }
        };

        let summary = RelaySummary {
            id,
            bytes_in: counters.bytes_in(),
            bytes_out: counters.bytes_out(),
            duration: started_at.elapsed(),
            end,
        };
        debug!(
            "Session {} relay finished: {} ({} bytes in, {} bytes out)",
            id, summary.end, summary.bytes_in, summary.bytes_out
        );
        summary
    }
}

impl<C, U> fmt::Debug for TunnelSession<C, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSession")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("bytes_in", &self.counters.bytes_in())
            .field("bytes_out", &self.counters.bytes_out())
            .finish()
    }
}

/// Copy one direction until EOF or error
async fn pump<R, W, F>(reader: &mut R, writer: &mut W, record: &F) -> Halt
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Halt::Eof,
            Ok(n) => n,
            Err(e) => return Halt::ReadFailed(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return Halt::WriteFailed(e);
        }
        if let Err(e) = writer.flush().await {
            return Halt::WriteFailed(e);
        }
        record(n as u64);
    }
}
