//! Transport module for Sockbridge
//!
//! This module provides the upstream connector abstraction and its
//! implementations: tunnels through the SOCKS5 upstream, or direct dials.

mod addr;
mod direct;
mod socks5;

pub use addr::UpstreamAddr;
pub use direct::DirectConnector;
pub use socks5::Socks5Connector;

use crate::config::{ConnectStrategy, ServerConfig, TcpConfig, UpstreamProxyConfig};
use crate::error::BridgeError;
use crate::socks::Destination;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Socket options for configuring connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Create socket options from TCP config
    pub fn from_tcp_config(config: &TcpConfig) -> Self {
        SocketOpts {
            nodelay: config.nodelay,
            keepalive_secs: Some(config.keepalive_secs),
            keepalive_interval: Some(config.keepalive_interval),
        }
    }

    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Make the next close of `stream` send RST instead of FIN
///
/// Used when a client holds a partial response: a reset is the only signal
/// a close-delimited body was truncated.
pub fn reset_on_close(stream: &TcpStream) -> std::io::Result<()> {
    socket2::SockRef::from(stream).set_linger(Some(Duration::ZERO))
}

/// Opens a duplex tunnel to a destination
///
/// Implementations must not leak half-open sockets: any stream opened
/// during a failed attempt is closed before the error is returned.
#[async_trait]
pub trait Connector: Debug + Send + Sync + 'static {
    /// The stream type produced by this connector
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug + 'static;

    /// Short strategy name used in logs and status output
    fn name(&self) -> &'static str;

    /// Establish a tunnel to `dest`
    async fn connect(&self, dest: &Destination) -> Result<Self::Stream, BridgeError>;
}

/// Dynamic connector trait for boxed connectors
#[async_trait]
pub trait ConnectorDyn: Debug + Send + Sync {
    /// Short strategy name used in logs and status output
    fn name_dyn(&self) -> &'static str;

    /// Establish a tunnel and return a boxed stream
    async fn connect_dyn(&self, dest: &Destination) -> Result<Box<dyn StreamDyn>, BridgeError>;
}

#[async_trait]
impl<C: Connector> ConnectorDyn for C {
    fn name_dyn(&self) -> &'static str {
        self.name()
    }

    async fn connect_dyn(&self, dest: &Destination) -> Result<Box<dyn StreamDyn>, BridgeError> {
        let stream = self.connect(dest).await?;
        Ok(Box::new(stream))
    }
}

/// Dynamic stream trait for boxed streams
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}

/// Create the connector for the configured strategy
pub fn create_connector(
    config: &ServerConfig,
    upstream: Arc<UpstreamProxyConfig>,
) -> Arc<dyn ConnectorDyn> {
    match config.strategy {
        ConnectStrategy::Socks5 => Arc::new(Socks5Connector::from_config(config, upstream)),
        ConnectStrategy::Direct => Arc::new(DirectConnector::from_config(config)),
    }
}
