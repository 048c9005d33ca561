//! Local listener configuration
//!
//! Defines how the HTTP proxy frontend binds, which connect strategy it
//! uses, and the timeouts that bound every tunnel attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

/// Default bind address (loopback only)
fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Default upstream dial timeout in milliseconds
fn default_dial_timeout_ms() -> u64 {
    30_000
}

/// Default SOCKS5 handshake timeout in milliseconds
fn default_handshake_timeout_ms() -> u64 {
    30_000
}

/// Default timeout for a client to deliver its request head
fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Default time `stop()` waits for connection tasks before aborting them
fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// How tunnels reach their destination, chosen once at configuration time
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectStrategy {
    /// Through the upstream SOCKS5 proxy, hostname resolved by the proxy
    #[default]
    #[serde(rename = "socks5")]
    Socks5,
    /// Straight to the destination, resolved locally
    #[serde(rename = "direct")]
    Direct,
}

impl fmt::Display for ConnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStrategy::Socks5 => write!(f, "socks5"),
            ConnectStrategy::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for ConnectStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socks5" => Ok(ConnectStrategy::Socks5),
            "direct" => Ok(ConnectStrategy::Direct),
            other => Err(format!("unknown connect strategy: {}", other)),
        }
    }
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_nodelay() -> bool {
    true
}

/// TCP socket options applied to client and upstream sockets
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// HTTP proxy listener configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Local address to listen on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Local port to listen on (0 = ephemeral)
    #[serde(default)]
    pub bind_port: u16,

    /// Upstream dial timeout in milliseconds
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// SOCKS5 handshake timeout in milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Timeout for reading a client's request head in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Grace period for connection tasks on stop, in milliseconds
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Connect strategy
    #[serde(default)]
    pub strategy: ConnectStrategy,

    /// Socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            bind_port: 0,
            dial_timeout_ms: default_dial_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            strategy: ConnectStrategy::default(),
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Upstream dial timeout
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// SOCKS5 handshake timeout
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Request head timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.dial_timeout_ms == 0 {
            return Err("dial_timeout_ms must be greater than 0".to_string());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be greater than 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
