//! Destination parsing for proxy requests

use super::head::RequestHead;
use super::headers;
use crate::error::BridgeError;
use crate::socks::{Destination, MAX_DOMAIN_LEN};
use url::{Host, Url};

/// Port used when a CONNECT target has none (or an unusable one)
pub const DEFAULT_CONNECT_PORT: u16 = 443;

/// Port used for origin-form requests without a port in `Host`
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Where a plain HTTP request goes and what to send as its request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Tunnel destination
    pub destination: Destination,
    /// Origin-form path and query
    pub path: String,
    /// Value for the `Host` header
    pub host_header: String,
}

/// Split `host[:port]` / `[v6][:port]`; the port is `None` when absent or invalid
fn split_authority(authority: &str) -> (String, Option<u16>) {
    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => {
                let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
                (host.to_string(), port)
            }
            None => (rest.to_string(), None),
        };
    }

    match authority.rsplit_once(':') {
        // more than one colon without brackets: a bare IPv6 literal
        Some((host, _)) if host.contains(':') => (authority.to_string(), None),
        Some((host, port)) => (host.to_string(), port.parse().ok()),
        None => (authority.to_string(), None),
    }
}

/// Parse a CONNECT request target
///
/// A missing or malformed port falls back to 443.
pub fn parse_connect_target(target: &str) -> Result<Destination, BridgeError> {
    let (host, port) = split_authority(target.trim());
    if host.is_empty() {
        return Err(BridgeError::MalformedRequest(format!(
            "invalid CONNECT target: {:?}",
            target
        )));
    }
    checked(Destination::new(host, port.unwrap_or(DEFAULT_CONNECT_PORT)))
}

/// Reject hosts a SOCKS5 CONNECT cannot carry
fn checked(destination: Destination) -> Result<Destination, BridgeError> {
    destination.validate().map_err(|_| {
        BridgeError::MalformedRequest(format!(
            "destination host is {} bytes, at most {} allowed",
            destination.host.len(),
            MAX_DOMAIN_LEN
        ))
    })?;
    Ok(destination)
}

fn host_to_string(host: Host<&str>) -> String {
    match host {
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}

/// Resolve where a non-CONNECT request should be forwarded
///
/// Accepts absolute-form targets (`http://host[:port]/path`, scheme default
/// port) and origin-form targets with a `Host` header.
pub fn parse_request_target(head: &RequestHead) -> Result<ForwardTarget, BridgeError> {
    let target = head.target.as_str();
    let lower = target.get(..8).unwrap_or(target).to_ascii_lowercase();

    if lower.starts_with("http://") || lower.starts_with("https://") {
        let url = Url::parse(target)
            .map_err(|e| BridgeError::MalformedRequest(format!("invalid request URL: {}", e)))?;
        let host = url
            .host()
            .map(host_to_string)
            .ok_or_else(|| BridgeError::MalformedRequest("request URL has no host".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(DEFAULT_HTTP_PORT);

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let host_header = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };

        return Ok(ForwardTarget {
            destination: checked(Destination::new(host, port))?,
            path,
            host_header,
        });
    }

    if target.starts_with('/') {
        let host_header = headers::find(&head.headers, "host")
            .and_then(|h| h.value_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                BridgeError::MalformedRequest("origin-form request without Host header".to_string())
            })?
            .to_string();

        let (host, port) = split_authority(&host_header);
        if host.is_empty() {
            return Err(BridgeError::MalformedRequest(format!(
                "invalid Host header: {:?}",
                host_header
            )));
        }
        return Ok(ForwardTarget {
            destination: checked(Destination::new(host, port.unwrap_or(DEFAULT_HTTP_PORT)))?,
            path: target.to_string(),
            host_header,
        });
    }

    Err(BridgeError::MalformedRequest(format!(
        "unsupported request target: {:?}",
        target
    )))
}
