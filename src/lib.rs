//! # Sockbridge - HTTP to SOCKS5 Proxy Bridge
//!
//! Sockbridge runs a local HTTP proxy and carries every request through an
//! upstream SOCKS5 proxy, optionally authenticated with username/password.
//! Destination hostnames are handed to the upstream unresolved, so DNS
//! resolution happens at the upstream rather than on this host.
//!
//! ## Features
//!
//! - **HTTPS Tunneling**: `CONNECT host:port` tunnels relayed byte for byte
//! - **Plain HTTP Forwarding**: absolute-form and origin-form requests with hop-by-hop header sanitation
//! - **Remote DNS**: SOCKS5 CONNECT always uses domain-name addressing
//! - **Managed Lifecycle**: start/stop on ephemeral ports, live stats and session registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sockbridge::config::{ServerConfig, UpstreamProxyConfig};
//! use sockbridge::server::ProxyServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let upstream = UpstreamProxyConfig::parse_proxy_string("socks5:proxy.example.com:1080:user:pass")?;
//!     let server = ProxyServer::new(upstream, ServerConfig::default());
//!
//!     let bound = server.start("127.0.0.1".parse()?, 0).await?;
//!     println!("point your browser at {}", bound.url);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! HTTP client -> HttpProxyFrontend -> Connector (dial + SOCKS5 handshake) -> upstream SOCKS5 -> target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod http;
pub mod relay;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{BridgeError, Socks5Error};
pub use server::{run_server, ProxyServer};

/// Version of the Sockbridge library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
