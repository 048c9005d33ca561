//! SOCKS5 upstream connector
//!
//! Dials the configured upstream proxy and runs the SOCKS5 handshake to
//! open a tunnel to the final destination.

use super::{Connector, SocketOpts, UpstreamAddr};
use crate::config::{ServerConfig, UpstreamProxyConfig};
use crate::error::BridgeError;
use crate::socks::{Destination, SocksHandshake};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Connector that tunnels through the upstream SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct Socks5Connector {
    /// Upstream proxy configuration, shared read-only
    upstream: Arc<UpstreamProxyConfig>,
    /// Upstream address with cached resolution
    addr: UpstreamAddr,
    /// Socket options applied to upstream connections
    socket_opts: SocketOpts,
    /// Upstream dial timeout
    dial_timeout: Duration,
    /// SOCKS5 handshake timeout
    handshake_timeout: Duration,
}

impl Socks5Connector {
    /// Create a connector with default options (30s timeouts)
    pub fn new(upstream: Arc<UpstreamProxyConfig>) -> Self {
        let addr = UpstreamAddr::new(upstream.host.clone(), upstream.port);
        Socks5Connector {
            upstream,
            addr,
            socket_opts: SocketOpts::default(),
            dial_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
        }
    }

    /// Create a connector from the server configuration
    pub fn from_config(config: &ServerConfig, upstream: Arc<UpstreamProxyConfig>) -> Self {
        Socks5Connector::new(upstream)
            .with_socket_opts(SocketOpts::from_tcp_config(&config.tcp))
            .with_dial_timeout(config.dial_timeout())
            .with_handshake_timeout(config.handshake_timeout())
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set the upstream dial timeout
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Upstream proxy configuration
    pub fn upstream(&self) -> &UpstreamProxyConfig {
        &self.upstream
    }

    /// Open a TCP connection to the upstream proxy
    async fn dial(&self) -> Result<TcpStream, BridgeError> {
        let unreachable = |reason: String| BridgeError::UpstreamUnreachable {
            addr: self.addr.to_string(),
            reason,
        };

        let connect = async {
            let resolved = self.addr.resolve().await?;
            TcpStream::connect(resolved).await
        };

        let stream = match tokio::time::timeout(self.dial_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.addr.invalidate().await;
                return Err(unreachable(e.to_string()));
            }
            Err(_) => {
                self.addr.invalidate().await;
                return Err(unreachable(format!("timed out after {:?}", self.dial_timeout)));
            }
        };

        if let Err(e) = self.socket_opts.apply(&stream) {
            warn!("Failed to apply socket options: {}", e);
        }

        debug!("TCP connection established to upstream {}", self.addr);
        Ok(stream)
    }
}

#[async_trait]
impl Connector for Socks5Connector {
    type Stream = TcpStream;

    fn name(&self) -> &'static str {
        "socks5"
    }

    async fn connect(&self, dest: &Destination) -> Result<TcpStream, BridgeError> {
        let mut stream = self.dial().await?;

        let handshake = SocksHandshake::from_credentials(self.upstream.credentials());
        let result =
            tokio::time::timeout(self.handshake_timeout, handshake.run(&mut stream, dest)).await;

        match result {
            Ok(Ok(_bound)) => Ok(stream),
            Ok(Err(e)) => {
                close_quietly(stream).await;
                Err(e)
            }
            Err(_) => {
                close_quietly(stream).await;
                Err(BridgeError::HandshakeTimeout(self.addr.to_string()))
            }
        }
    }
}

/// Close a half-open upstream connection
async fn close_quietly(mut stream: TcpStream) {
    let _ = stream.shutdown().await;
    drop(stream);
}
