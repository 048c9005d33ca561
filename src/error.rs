//! Error types for Sockbridge
//!
//! This module defines the typed errors surfaced by the handshake, the
//! upstream connector, the HTTP frontend and the server lifecycle.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for Sockbridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Socket read/write/connect failure
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// SOCKS5 protocol error reported by (or caused by) the upstream proxy
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),

    /// Upstream proxy could not be reached (refused, timed out, unresolvable)
    #[error("Upstream {addr} unreachable: {reason}")]
    UpstreamUnreachable {
        /// Upstream address as configured
        addr: String,
        /// Human readable cause
        reason: String,
    },

    /// The upstream accepted the connection but stalled during the handshake
    #[error("SOCKS5 handshake with {0} timed out")]
    HandshakeTimeout(String),

    /// Local listen address unavailable
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Unparseable request from the local client
    #[error("Malformed client request: {0}")]
    MalformedRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// `start` called on a server that is already listening
    #[error("Proxy server is already running")]
    AlreadyRunning,
}

impl BridgeError {
    /// HTTP status the frontend answers with when this error happens
    /// before any response bytes were sent
    pub fn http_status(&self) -> u16 {
        match self {
            BridgeError::MalformedRequest(_) => 400,
            _ => 502,
        }
    }

    /// Whether the failure happened on the upstream side of the tunnel
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            BridgeError::Socks5(_)
                | BridgeError::UpstreamUnreachable { .. }
                | BridgeError::HandshakeTimeout(_)
        )
    }
}

/// SOCKS5 specific errors (client side of the negotiation)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Server answered with a version byte other than 0x05
    #[error("Invalid SOCKS version in server reply: {0:#04x}")]
    InvalidVersion(u8),

    /// Server selected a method we did not offer (or 0xFF)
    #[error("Unsupported authentication method selected: {0:#04x}")]
    UnsupportedAuthMethod(u8),

    /// Server wants username/password but none are configured
    #[error("Server requires username/password authentication but no credentials are configured")]
    MissingCredentials,

    /// Username or password longer than the one-byte length prefix allows
    #[error("{field} is {len} bytes, SOCKS5 allows at most 255")]
    CredentialTooLong {
        /// Which credential overflowed
        field: &'static str,
        /// Its UTF-8 length
        len: usize,
    },

    /// Username/password sub-negotiation rejected
    #[error("Authentication failed (status {0:#04x})")]
    AuthenticationFailed(u8),

    /// CONNECT rejected by the server
    #[error("Connect failed: {}", describe_reply(.0))]
    ConnectFailed(u8),

    /// Reply carried an address type we cannot frame
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Destination host cannot be sent as a SOCKS5 domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

fn describe_reply(code: &u8) -> String {
    match Socks5ReplyCode::try_from(*code) {
        Ok(reply) => format!("{} ({:#04x})", reply, code),
        Err(_) => format!("unassigned reply code ({:#04x})", code),
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = Socks5Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(Socks5Error::ConnectFailed(other)),
        }
    }
}

impl fmt::Display for Socks5ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Socks5ReplyCode::Succeeded => "succeeded",
            Socks5ReplyCode::GeneralFailure => "general SOCKS server failure",
            Socks5ReplyCode::ConnectionNotAllowed => "connection not allowed by ruleset",
            Socks5ReplyCode::NetworkUnreachable => "network unreachable",
            Socks5ReplyCode::HostUnreachable => "host unreachable",
            Socks5ReplyCode::ConnectionRefused => "connection refused",
            Socks5ReplyCode::TtlExpired => "TTL expired",
            Socks5ReplyCode::CommandNotSupported => "command not supported",
            Socks5ReplyCode::AddressTypeNotSupported => "address type not supported",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_reply_code_from_u8_valid() {
        assert_eq!(
            Socks5ReplyCode::try_from(0x00).unwrap(),
            Socks5ReplyCode::Succeeded
        );
        assert_eq!(
            Socks5ReplyCode::try_from(0x04).unwrap(),
            Socks5ReplyCode::HostUnreachable
        );
        assert_eq!(
            Socks5ReplyCode::try_from(0x05).unwrap(),
            Socks5ReplyCode::ConnectionRefused
        );
        assert_eq!(
            Socks5ReplyCode::try_from(0x08).unwrap(),
            Socks5ReplyCode::AddressTypeNotSupported
        );
    }

    #[test]
    fn test_socks5_reply_code_from_u8_invalid() {
        assert_eq!(
            Socks5ReplyCode::try_from(0x09),
            Err(Socks5Error::ConnectFailed(0x09))
        );
        assert!(Socks5ReplyCode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_connect_failed_display() {
        let err = Socks5Error::ConnectFailed(0x05);
        assert_eq!(format!("{}", err), "Connect failed: connection refused (0x05)");

        let err = Socks5Error::ConnectFailed(0x42);
        assert_eq!(format!("{}", err), "Connect failed: unassigned reply code (0x42)");
    }

    #[test]
    fn test_socks5_error_display() {
        let err = Socks5Error::InvalidVersion(4);
        assert_eq!(format!("{}", err), "Invalid SOCKS version in server reply: 0x04");

        let err = Socks5Error::UnsupportedAuthMethod(0xFF);
        assert_eq!(
            format!("{}", err),
            "Unsupported authentication method selected: 0xff"
        );

        let err = Socks5Error::CredentialTooLong {
            field: "username",
            len: 300,
        };
        assert_eq!(
            format!("{}", err),
            "username is 300 bytes, SOCKS5 allows at most 255"
        );

        let err = Socks5Error::AuthenticationFailed(1);
        assert_eq!(format!("{}", err), "Authentication failed (status 0x01)");
    }

    #[test]
    fn test_bridge_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let err: BridgeError = io_err.into();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert_eq!(err.http_status(), 502);
        assert!(!err.is_upstream());
    }

    #[test]
    fn test_bridge_error_from_socks5() {
        let err: BridgeError = Socks5Error::AuthenticationFailed(1).into();
        assert!(matches!(err, BridgeError::Socks5(_)));
        assert!(err.is_upstream());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            BridgeError::MalformedRequest("bad".to_string()).http_status(),
            400
        );
        let err = BridgeError::UpstreamUnreachable {
            addr: "127.0.0.1:1080".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(err.http_status(), 502);
        assert_eq!(
            format!("{}", err),
            "Upstream 127.0.0.1:1080 unreachable: refused"
        );
        assert_eq!(BridgeError::HandshakeTimeout("x:1".into()).http_status(), 502);
    }
}
