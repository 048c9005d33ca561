//! Client side SOCKS5 handshake
//!
//! Drives method negotiation, optional username/password authentication and
//! the CONNECT request over a stream the caller already opened to the
//! upstream proxy. The stream is borrowed; closing it on failure is the
//! caller's job.

use crate::error::{BridgeError, Socks5Error};
use crate::socks::auth::{authenticate_password, negotiate_method, AuthMethod};
use crate::socks::command::{read_connect_reply, send_connect};
use crate::socks::types::{BoundAddr, Destination};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// SOCKS5 client handshake
#[derive(Debug, Clone, Copy, Default)]
pub struct SocksHandshake<'a> {
    credentials: Option<(&'a str, &'a str)>,
}

impl<'a> SocksHandshake<'a> {
    /// Handshake that can only complete if the server selects "no auth"
    pub fn new() -> Self {
        SocksHandshake { credentials: None }
    }

    /// Handshake that authenticates with username/password when asked to
    pub fn with_credentials(username: &'a str, password: &'a str) -> Self {
        SocksHandshake {
            credentials: Some((username, password)),
        }
    }

    /// Handshake configured from an optional credential pair
    pub fn from_credentials(credentials: Option<(&'a str, &'a str)>) -> Self {
        SocksHandshake { credentials }
    }

    /// Run the full negotiation and request a tunnel to `dest`
    ///
    /// # Protocol Flow
    ///
    /// 1. Greeting offering no-auth and username/password
    /// 2. Username/password sub-negotiation (if selected)
    /// 3. CONNECT with the destination as a domain name
    /// 4. Reply validation, bound address consumed
    ///
    /// On success the stream is positioned at the first tunneled byte.
    pub async fn run<S>(&self, stream: &mut S, dest: &Destination) -> Result<BoundAddr, BridgeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // Reject unsendable hosts before touching the wire
        dest.validate()?;

        let method = negotiate_method(stream).await?;

        if method == AuthMethod::Password {
            let (username, password) = self
                .credentials
                .ok_or(Socks5Error::MissingCredentials)?;
            authenticate_password(stream, username, password).await?;
        }

        send_connect(stream, dest).await?;
        let bound = read_connect_reply(stream).await?;

        debug!("SOCKS5 tunnel to {} ready, upstream bound {}", dest, bound);
        Ok(bound)
    }
}
