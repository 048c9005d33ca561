//! Direct connector
//!
//! Dials destinations straight from this host, resolving names locally.
//! Selected with `strategy = "direct"` to rule the upstream proxy in or out
//! when diagnosing connectivity.

use super::{Connector, SocketOpts};
use crate::config::ServerConfig;
use crate::error::BridgeError;
use crate::socks::Destination;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Connector that bypasses the upstream proxy
#[derive(Debug, Clone)]
pub struct DirectConnector {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl DirectConnector {
    /// Create a new direct connector with default options
    pub fn with_defaults() -> Self {
        DirectConnector {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Create a direct connector from the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        DirectConnector {
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            connect_timeout: config.dial_timeout(),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for DirectConnector {
    type Stream = TcpStream;

    fn name(&self) -> &'static str {
        "direct"
    }

    async fn connect(&self, dest: &Destination) -> Result<TcpStream, BridgeError> {
        let authority = dest.authority();
        let unreachable = |reason: String| BridgeError::UpstreamUnreachable {
            addr: authority.clone(),
            reason,
        };

        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(authority.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(unreachable(e.to_string())),
            Err(_) => {
                return Err(unreachable(format!(
                    "timed out after {:?}",
                    self.connect_timeout
                )))
            }
        };

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        tracing::debug!("Direct connection established to {}", authority);
        Ok(stream)
    }
}
