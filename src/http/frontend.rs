//! HTTP proxy frontend
//!
//! Handles one accepted client connection: reads the request head, opens the
//! upstream tunnel through the configured connector, then either relays a
//! CONNECT tunnel or forwards a single plain HTTP exchange.

use super::body::{copy_body, read_chunked, BodyKind};
use super::head::{read_request_head, read_response_head, RequestHead};
use super::headers::{content_length, expects_continue, is_chunked, strip_hop_by_hop, Header};
use super::response::{write_error, CONNECTION_ESTABLISHED, CONTINUE};
use super::target::{parse_connect_target, parse_request_target};
use crate::error::BridgeError;
use crate::relay::{RelayEnd, RelaySummary, SessionId, TunnelSession};
use crate::server::{ConnectionGuard, ProxyObserver, ProxyStats, Shutdown};
use crate::transport::{reset_on_close, ConnectorDyn, SocketOpts};
use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Per-connection request handler shared by all connection tasks
pub struct HttpProxyFrontend {
    connector: Arc<dyn ConnectorDyn>,
    observer: Arc<dyn ProxyObserver>,
    stats: Arc<ProxyStats>,
    socket_opts: SocketOpts,
    request_timeout: Duration,
}

/// How the client socket is closed once its request is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientClose {
    /// Normal close
    Graceful,
    /// A response was cut short after its head went out; reset the socket
    Abort,
}

/// Failure while forwarding a plain request, tagged with the side at fault
enum ForwardError {
    /// Nothing was forwarded yet; answer with an HTTP status
    Request(BridgeError),
    /// Client socket failed
    Client(io::Error),
    /// Upstream socket failed
    Upstream(io::Error),
}

impl ForwardError {
    fn relay_end(&self) -> RelayEnd {
        match self {
            ForwardError::Request(_) => RelayEnd::UpstreamError(io::ErrorKind::Other),
            ForwardError::Client(e) => RelayEnd::ClientError(e.kind()),
            ForwardError::Upstream(e) => RelayEnd::UpstreamError(e.kind()),
        }
    }

    fn into_bridge_error(self) -> BridgeError {
        match self {
            ForwardError::Request(e) => e,
            ForwardError::Client(e) | ForwardError::Upstream(e) => BridgeError::Transport(e),
        }
    }
}

/// Progress of a plain exchange, inspected after it ends
#[derive(Debug, Default)]
struct Progress {
    established_at: Option<Instant>,
    headers_sent: bool,
    bytes_in: u64,
    bytes_out: u64,
}

/// Writer that counts bytes and remembers whether it failed
struct Tracked<'a, W> {
    inner: &'a mut W,
    written: u64,
    failed: bool,
}

impl<'a, W> Tracked<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Tracked {
            inner,
            written: 0,
            failed: false,
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Tracked<'_, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut *self.inner).poll_write(cx, buf);
        match &poll {
            Poll::Ready(Ok(n)) => self.written += *n as u64,
            Poll::Ready(Err(_)) => self.failed = true,
            Poll::Pending => {}
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut *self.inner).poll_flush(cx);
        if let Poll::Ready(Err(_)) = &poll {
            self.failed = true;
        }
        poll
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}

async fn send_all<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn send_interim<W>(client: &mut W, progress: &mut Progress) -> Result<(), ForwardError>
where
    W: AsyncWrite + Unpin,
{
    send_all(client, CONTINUE).await.map_err(ForwardError::Client)?;
    progress.bytes_out += CONTINUE.len() as u64;
    Ok(())
}

impl HttpProxyFrontend {
    /// Create a frontend dispatching to `connector`
    pub fn new(
        connector: Arc<dyn ConnectorDyn>,
        observer: Arc<dyn ProxyObserver>,
        stats: Arc<ProxyStats>,
    ) -> Self {
        HttpProxyFrontend {
            connector,
            observer,
            stats,
            socket_opts: SocketOpts::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set socket options applied to accepted client sockets
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set how long a client may take to send its request head
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Observer notified of connection events
    pub fn observer(&self) -> &Arc<dyn ProxyObserver> {
        &self.observer
    }

    /// Handle an accepted TCP client until it is done
    ///
    /// The guard is released when this returns (or the task is aborted).
    pub async fn handle_connection(
        &self,
        guard: ConnectionGuard,
        mut stream: TcpStream,
        shutdown: Shutdown,
    ) {
        if let Err(e) = self.socket_opts.apply(&stream) {
            debug!("Failed to apply client socket options: {}", e);
        }
        if self.serve(&guard, &mut stream, shutdown).await == ClientClose::Abort {
            if let Err(e) = reset_on_close(&stream) {
                debug!("Session {} could not arm reset on close: {}", guard.id(), e);
            }
        }
    }

    /// Serve one request on an arbitrary client stream
    ///
    /// Returns [`ClientClose::Abort`] when the client already received part of
    /// a response that could not be completed.
    pub async fn serve<S>(
        &self,
        guard: &ConnectionGuard,
        mut client: S,
        mut shutdown: Shutdown,
    ) -> ClientClose
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = guard.id();
        let mut buf = BytesMut::with_capacity(8 * 1024);

        let read = tokio::select! {
            _ = shutdown.triggered() => return ClientClose::Graceful,
            read = tokio::time::timeout(
                self.request_timeout,
                read_request_head(&mut client, &mut buf),
            ) => read,
        };

        let head = match read {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => {
                debug!("Session {} closed without sending a request", id);
                return ClientClose::Graceful;
            }
            Ok(Err(e)) => {
                self.stats.record_request();
                self.fail(id, &mut client, e, false).await;
                return ClientClose::Graceful;
            }
            Err(_) if buf.is_empty() => {
                debug!("Session {} idle, closing", id);
                return ClientClose::Graceful;
            }
            Err(_) => {
                self.stats.record_request();
                let e = BridgeError::MalformedRequest(
                    "timed out waiting for the request head".to_string(),
                );
                self.fail(id, &mut client, e, false).await;
                return ClientClose::Graceful;
            }
        };

        self.stats.record_request();
        debug!("Session {} request: {} {}", id, head.method, head.target);

        if head.is_connect() {
            self.handle_connect(guard, client, head, buf, shutdown).await;
            ClientClose::Graceful
        } else {
            self.handle_forward(guard, client, head, buf, shutdown).await
        }
    }

    /// Count the failure and answer the client if nothing was sent yet
    ///
    /// A client that already has a response head is left for the caller to
    /// abort; a FIN would make the partial body look complete.
    async fn fail<S>(&self, id: SessionId, client: &mut S, error: BridgeError, headers_sent: bool)
    where
        S: AsyncWrite + Unpin,
    {
        self.stats.record_error();
        self.observer.request_failed(id, &error);
        if !headers_sent {
            let _ = write_error(client, error.http_status(), &error.to_string()).await;
            let _ = client.shutdown().await;
        }
    }

    async fn handle_connect<S>(
        &self,
        guard: &ConnectionGuard,
        mut client: S,
        head: RequestHead,
        pending: BytesMut,
        mut shutdown: Shutdown,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = guard.id();
        let destination = match parse_connect_target(&head.target) {
            Ok(destination) => destination,
            Err(e) => return self.fail(id, &mut client, e, false).await,
        };
        guard.set_destination(&destination);

        let connected = tokio::select! {
            _ = shutdown.triggered() => return,
            connected = self.connector.connect_dyn(&destination) => connected,
        };
        let upstream = match connected {
            Ok(upstream) => upstream,
            Err(e) => return self.fail(id, &mut client, e, false).await,
        };

        if let Err(e) = send_all(&mut client, CONNECTION_ESTABLISHED).await {
            return self.fail(id, &mut client, e.into(), true).await;
        }
        self.observer.tunnel_established(id, &destination);

        let summary = TunnelSession::new(id, client, upstream)
            .with_pending(pending.freeze())
            .with_totals(self.stats.traffic())
            .relay(shutdown)
            .await;
        self.observer.tunnel_closed(&summary);
    }

    async fn handle_forward<S>(
        &self,
        guard: &ConnectionGuard,
        mut client: S,
        head: RequestHead,
        mut buf: BytesMut,
        mut shutdown: Shutdown,
    ) -> ClientClose
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = guard.id();
        let mut progress = Progress::default();

        let outcome = tokio::select! {
            _ = shutdown.triggered() => None,
            result = self.forward(guard, &mut client, head, &mut buf, &mut progress) => Some(result),
        };

        let traffic = self.stats.traffic();
        traffic.add_in(progress.bytes_in);
        traffic.add_out(progress.bytes_out);

        let end = match outcome {
            None => RelayEnd::Shutdown,
            Some(Ok(())) => RelayEnd::UpstreamClosed,
            Some(Err(e)) => {
                let end = e.relay_end();
                self.fail(id, &mut client, e.into_bridge_error(), progress.headers_sent)
                    .await;
                end
            }
        };

        if let Some(established_at) = progress.established_at {
            self.observer.tunnel_closed(&RelaySummary {
                id,
                bytes_in: progress.bytes_in,
                bytes_out: progress.bytes_out,
                duration: established_at.elapsed(),
                end,
            });
        }

        if progress.headers_sent && end != RelayEnd::UpstreamClosed {
            ClientClose::Abort
        } else {
            ClientClose::Graceful
        }
    }

    /// Forward one plain request and stream its response back
    async fn forward<S>(
        &self,
        guard: &ConnectionGuard,
        client: &mut S,
        head: RequestHead,
        buf: &mut BytesMut,
        progress: &mut Progress,
    ) -> Result<(), ForwardError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = guard.id();
        let target = parse_request_target(&head).map_err(ForwardError::Request)?;
        guard.set_destination(&target.destination);

        let request_body = if is_chunked(&head.headers) {
            BodyKind::Chunked
        } else {
            match content_length(&head.headers) {
                Ok(Some(len)) => BodyKind::Length(len),
                Ok(None) => BodyKind::Empty,
                Err(msg) => return Err(ForwardError::Request(BridgeError::MalformedRequest(msg))),
            }
        };

        // Answered here so the client never waits on the origin for it
        let send_continue = expects_continue(&head.headers) && head.version >= 1;

        let dechunked = match request_body {
            BodyKind::Chunked => {
                if send_continue {
                    send_interim(client, progress).await?;
                }
                Some(read_chunked(client, buf).await.map_err(|e| {
                    if e.kind() == io::ErrorKind::InvalidData {
                        ForwardError::Request(BridgeError::MalformedRequest(e.to_string()))
                    } else {
                        ForwardError::Client(e)
                    }
                })?)
            }
            _ => None,
        };

        let mut upstream = self
            .connector
            .connect_dyn(&target.destination)
            .await
            .map_err(ForwardError::Request)?;
        progress.established_at = Some(Instant::now());
        self.observer.tunnel_established(id, &target.destination);

        let is_head = head.is_head();
        let mut headers = head.headers;
        strip_hop_by_hop(&mut headers);
        headers.retain(|h| {
            !h.is("host")
                && !(send_continue && h.is("expect"))
                && !(dechunked.is_some() && h.is("content-length"))
        });

        let mut out = format!("{} {} HTTP/1.1\r\n", head.method, target.path).into_bytes();
        Header::new("Host", &target.host_header).write_to(&mut out);
        for header in &headers {
            header.write_to(&mut out);
        }
        if let Some(body) = &dechunked {
            Header::new("Content-Length", body.len().to_string()).write_to(&mut out);
        }
        Header::new("Connection", "close").write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        if let Some(body) = &dechunked {
            out.extend_from_slice(body);
        }

        upstream
            .write_all(&out)
            .await
            .map_err(ForwardError::Upstream)?;
        progress.bytes_in += out.len() as u64;

        if let BodyKind::Length(len) = request_body {
            if send_continue && len > 0 {
                upstream.flush().await.map_err(ForwardError::Upstream)?;
                send_interim(client, progress).await?;
            }
            let mut sink = Tracked::new(&mut upstream);
            let copied = copy_body(BodyKind::Length(len), client, buf, &mut sink).await;
            progress.bytes_in += sink.written;
            if let Err(e) = copied {
                return Err(if sink.failed {
                    ForwardError::Upstream(e)
                } else {
                    ForwardError::Client(e)
                });
            }
        }
        upstream.flush().await.map_err(ForwardError::Upstream)?;

        let mut upstream_buf = BytesMut::with_capacity(8 * 1024);
        let mut response = loop {
            let mut response = read_response_head(&mut upstream, &mut upstream_buf)
                .await
                .map_err(ForwardError::Upstream)?;
            if !response.is_interim() {
                break response;
            }
            strip_hop_by_hop(&mut response.headers);
            let interim = response.to_bytes();
            send_all(client, &interim).await.map_err(ForwardError::Client)?;
            progress.bytes_out += interim.len() as u64;
        };

        let response_body = if is_head || response.code == 204 || response.code == 304 {
            BodyKind::Empty
        } else if is_chunked(&response.headers) {
            BodyKind::Chunked
        } else {
            match content_length(&response.headers) {
                Ok(Some(len)) => BodyKind::Length(len),
                _ => BodyKind::UntilEof,
            }
        };

        strip_hop_by_hop(&mut response.headers);
        if response_body == BodyKind::Chunked {
            response.headers.retain(|h| !h.is("content-length"));
        }
        response.headers.push(Header::new("Connection", "close"));

        let response_head = response.to_bytes();
        client
            .write_all(&response_head)
            .await
            .map_err(ForwardError::Client)?;
        progress.headers_sent = true;
        progress.bytes_out += response_head.len() as u64;

        let mut sink = Tracked::new(&mut *client);
        let copied = copy_body(response_body, &mut upstream, &mut upstream_buf, &mut sink).await;
        progress.bytes_out += sink.written;
        if let Err(e) = copied {
            return Err(if sink.failed {
                ForwardError::Client(e)
            } else {
                ForwardError::Upstream(e)
            });
        }

        debug!(
            "Session {} forwarded {} {} -> {}",
            id, response.code, target.destination, target.path
        );
        let _ = client.shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for HttpProxyFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProxyFrontend")
            .field("connector", &self.connector.name_dyn())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
