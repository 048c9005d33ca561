//! Configuration module for Sockbridge
//!
//! This module provides configuration types and parsing for the proxy.

mod server;
mod upstream;

pub use server::{ConnectStrategy, ServerConfig, TcpConfig};
pub use upstream::UpstreamProxyConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Upstream SOCKS5 proxy
    pub upstream: UpstreamProxyConfig,

    /// Local HTTP proxy listener
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Validate both sections
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.server
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid server configuration: {}", e))?;
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}
