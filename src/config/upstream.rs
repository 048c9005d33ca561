//! Upstream SOCKS5 proxy configuration
//!
//! Describes the authenticated SOCKS5 server every tunnel is dialed through.

use crate::error::BridgeError;
use crate::socks::MAX_CREDENTIAL_LEN;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Default SOCKS5 port when a proxy URL omits one
const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Upstream SOCKS5 proxy configuration
///
/// Username and password are either both present or both absent.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamProxyConfig {
    /// Upstream proxy hostname or IP
    pub host: String,

    /// Upstream proxy port
    pub port: u16,

    /// Username for RFC 1929 authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for RFC 1929 authentication
    #[serde(default)]
    pub password: Option<String>,
}

impl UpstreamProxyConfig {
    /// Create a config without credentials
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        UpstreamProxyConfig {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attach username/password credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port` form used for dialing and logging
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Credentials as a pair, if configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::Config("upstream host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::Config("upstream port must not be 0".to_string()));
        }
        match (&self.username, &self.password) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(BridgeError::Config(
                    "username and password must be configured together".to_string(),
                ));
            }
            _ => {}
        }
        for (field, value) in [("username", &self.username), ("password", &self.password)] {
            if let Some(value) = value {
                if value.len() > MAX_CREDENTIAL_LEN {
                    return Err(BridgeError::Config(format!(
                        "{} is {} bytes, SOCKS5 allows at most {}",
                        field,
                        value.len(),
                        MAX_CREDENTIAL_LEN
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse `socks5:HOST:PORT[:USER:PASS]` or `socks5://[user:pass@]host[:port]`
    pub fn parse_proxy_string(input: &str) -> Result<Self, BridgeError> {
        let input = input.trim();
        let config = if input.contains("://") {
            Self::parse_url(input)?
        } else {
            Self::parse_colon_form(input)?
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_colon_form(input: &str) -> Result<Self, BridgeError> {
        let parts: Vec<&str> = input.split(':').collect();
        let invalid = || {
            BridgeError::Config(format!(
                "invalid proxy string '{}', expected socks5:HOST:PORT[:USER:PASS]",
                redact(input)
            ))
        };

        if parts.first().map(|s| s.eq_ignore_ascii_case("socks5")) != Some(true) {
            return Err(invalid());
        }

        let (host, port, creds) = match parts.len() {
            3 => (parts[1], parts[2], None),
            5 => (parts[1], parts[2], Some((parts[3], parts[4]))),
            _ => return Err(invalid()),
        };
        let port: u16 = port.parse().map_err(|_| invalid())?;

        let mut config = UpstreamProxyConfig::new(host, port);
        if let Some((user, pass)) = creds {
            config = config.with_credentials(user, pass);
        }
        Ok(config)
    }

    fn parse_url(input: &str) -> Result<Self, BridgeError> {
        let url = Url::parse(input)
            .map_err(|e| BridgeError::Config(format!("invalid proxy URL: {}", e)))?;

        if !matches!(url.scheme(), "socks5" | "socks5h") {
            return Err(BridgeError::Config(format!(
                "unsupported proxy scheme '{}', expected socks5",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| BridgeError::Config("proxy URL has no host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_SOCKS_PORT);

        let mut config = UpstreamProxyConfig::new(host, port);
        if !url.username().is_empty() || url.password().is_some() {
            let user = percent_decode_str(url.username()).decode_utf8_lossy();
            let pass = url
                .password()
                .map(|p| percent_decode_str(p).decode_utf8_lossy())
                .unwrap_or_default();
            config = config.with_credentials(user, pass);
        }
        Ok(config)
    }
}

impl FromStr for UpstreamProxyConfig {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpstreamProxyConfig::parse_proxy_string(s)
    }
}

// Keep passwords out of logs.
impl fmt::Debug for UpstreamProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

fn redact(input: &str) -> String {
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() == 5 {
        format!("{}:{}:{}:{}:***", parts[0], parts[1], parts[2], parts[3])
    } else {
        input.to_string()
    }
}
