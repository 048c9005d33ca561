//! SOCKS5 type definitions
//!
//! Defines the destination requested from the upstream and the bound
//! address it reports back.

use super::consts::*;
use crate::error::Socks5Error;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Final destination of a tunnel
///
/// The host is always forwarded to the upstream proxy as a domain name,
/// even when it is an IP literal, so that resolution happens there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Destination {
    /// Create a new destination
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Destination {
            host: host.into(),
            port,
        }
    }

    /// Check that the host fits a SOCKS5 domain-name address
    pub fn validate(&self) -> Result<(), Socks5Error> {
        if self.host.is_empty() || self.host.len() > MAX_DOMAIN_LEN {
            return Err(Socks5Error::InvalidDomain(self.host.clone()));
        }
        Ok(())
    }

    /// Encode as `ATYP=0x03 | LEN | HOST | PORT(be)`
    pub fn to_bytes(&self) -> Result<Vec<u8>, Socks5Error> {
        self.validate()?;

        let mut bytes = Vec::with_capacity(4 + self.host.len());
        bytes.push(SOCKS5_ADDR_TYPE_DOMAIN);
        bytes.push(self.host.len() as u8);
        bytes.extend_from_slice(self.host.as_bytes());
        bytes.extend_from_slice(&self.port.to_be_bytes());
        Ok(bytes)
    }

    /// `host:port` suitable for a local socket connect
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Address reported in the upstream's CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl BoundAddr {
    /// Create from an IP and port
    pub fn ip(ip: IpAddr, port: u16) -> Self {
        BoundAddr::Ip(SocketAddr::new(ip, port))
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            BoundAddr::Ip(addr) => addr.port(),
            BoundAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddr::Ip(addr) => write!(f, "{}", addr),
            BoundAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}
