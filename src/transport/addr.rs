//! Upstream proxy address with a cached DNS answer
//!
//! The upstream host is looked up on the first dial and the answer is kept
//! until a dial fails, so a proxy that moved is looked up again on the next
//! attempt. Destination hosts never pass through here.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Host and port of the upstream proxy plus the last good lookup
#[derive(Clone)]
pub struct UpstreamAddr {
    host: String,
    port: u16,
    resolved: Arc<RwLock<Option<SocketAddr>>>,
}

impl UpstreamAddr {
    /// Address that is looked up on first use (IP literals never are)
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let literal = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, port));
        UpstreamAddr {
            host,
            port,
            resolved: Arc::new(RwLock::new(literal)),
        }
    }

    /// Configured host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configured port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Last lookup result still in use
    pub async fn cached(&self) -> Option<SocketAddr> {
        *self.resolved.read().await
    }

    /// Forget the lookup result after a failed dial
    pub async fn invalidate(&self) {
        let mut resolved = self.resolved.write().await;
        if !self.is_literal() {
            *resolved = None;
        }
    }

    /// Cached socket address, looking the host up when there is none
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        if let Some(addr) = self.cached().await {
            return Ok(addr);
        }

        let addr = self.lookup().await?;
        *self.resolved.write().await = Some(addr);
        Ok(addr)
    }

    async fn lookup(&self) -> io::Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        tokio::net::lookup_host((host, self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses found for upstream {}", self),
                )
            })
    }

    fn is_literal(&self) -> bool {
        self.host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok()
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpstreamAddr").field(&self.to_string()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn test_ip_literal_needs_no_lookup() {
        let addr = UpstreamAddr::new("10.0.0.5", 1080);
        assert_eq!(
            addr.cached().await,
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 1080))
        );

        // Nothing to look up again
        addr.invalidate().await;
        assert!(addr.cached().await.is_some());
    }

    #[tokio::test]
    async fn test_ipv6_literal_display() {
        let addr = UpstreamAddr::new("::1", 1080);
        assert_eq!(addr.to_string(), "[::1]:1080");
        assert_eq!(
            addr.resolve().await.unwrap(),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 1080)
        );

        let bracketed = UpstreamAddr::new("[::1]", 1080);
        assert_eq!(bracketed.to_string(), "[::1]:1080");
        assert!(bracketed.cached().await.is_some());
    }

    #[tokio::test]
    async fn test_hostname_cached_until_invalidated() {
        let addr = UpstreamAddr::new("localhost", 1080);
        assert!(addr.cached().await.is_none());

        let resolved = addr.resolve().await.unwrap();
        assert!(resolved.ip().is_loopback());
        assert_eq!(resolved.port(), 1080);
        assert_eq!(addr.cached().await, Some(resolved));

        addr.invalidate().await;
        assert!(addr.cached().await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_lookup() {
        let addr = UpstreamAddr::new("localhost", 9);
        let clone = addr.clone();
        addr.resolve().await.unwrap();
        assert!(clone.cached().await.is_some());
    }
}
