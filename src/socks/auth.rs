//! SOCKS5 method negotiation and RFC 1929 username/password authentication
//!
//! Client side: we offer both "no auth" and "username/password" and follow
//! whichever the upstream selects.

use crate::error::{BridgeError, Socks5Error};
use crate::socks::consts::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Authentication method selected by the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    NoAuth,
    /// Username/password authentication
    Password,
}

impl AuthMethod {
    /// Parse the method byte of the server's selection message
    pub fn from_byte(byte: u8) -> Result<Self, Socks5Error> {
        match byte {
            SOCKS5_AUTH_METHOD_NONE => Ok(AuthMethod::NoAuth),
            SOCKS5_AUTH_METHOD_PASSWORD => Ok(AuthMethod::Password),
            other => Err(Socks5Error::UnsupportedAuthMethod(other)),
        }
    }
}

/// Send the greeting and read the server's method selection
///
/// ```text
/// client: | VER=5 | NMETHODS=2 | 0x00 0x02 |
/// server: | VER=5 | METHOD |
/// ```
pub async fn negotiate_method<S>(stream: &mut S) -> Result<AuthMethod, BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = Vec::with_capacity(2 + SOCKS5_OFFERED_METHODS.len());
    greeting.push(SOCKS5_VERSION);
    greeting.push(SOCKS5_OFFERED_METHODS.len() as u8);
    greeting.extend_from_slice(&SOCKS5_OFFERED_METHODS);
    stream.write_all(&greeting).await?;
    stream.flush().await?;

    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    if buf[0] != SOCKS5_VERSION {
        return Err(Socks5Error::InvalidVersion(buf[0]).into());
    }

    let method = AuthMethod::from_byte(buf[1])?;
    debug!("Upstream selected auth method {:?}", method);
    Ok(method)
}

/// Build the sub-negotiation request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub fn build_password_request(username: &str, password: &str) -> Result<Vec<u8>, Socks5Error> {
    if username.len() > MAX_CREDENTIAL_LEN {
        return Err(Socks5Error::CredentialTooLong {
            field: "username",
            len: username.len(),
        });
    }
    if password.len() > MAX_CREDENTIAL_LEN {
        return Err(Socks5Error::CredentialTooLong {
            field: "password",
            len: password.len(),
        });
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(SOCKS5_AUTH_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    Ok(request)
}

/// Run the username/password sub-negotiation
///
/// Fails with [`Socks5Error::AuthenticationFailed`] unless the server
/// answers with status 0x00.
pub async fn authenticate_password<S>(
    stream: &mut S,
    username: &str,
    password: &str,
) -> Result<(), BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_password_request(username, password)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    if buf[1] != SOCKS5_AUTH_STATUS_SUCCESS {
        return Err(Socks5Error::AuthenticationFailed(buf[1]).into());
    }

    debug!("Upstream accepted credentials for user: {}", username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_auth_method_from_byte() {
        assert_eq!(AuthMethod::from_byte(0x00), Ok(AuthMethod::NoAuth));
        assert_eq!(AuthMethod::from_byte(0x02), Ok(AuthMethod::Password));
        assert_eq!(
            AuthMethod::from_byte(0xFF),
            Err(Socks5Error::UnsupportedAuthMethod(0xFF))
        );
        assert_eq!(
            AuthMethod::from_byte(0x01),
            Err(Socks5Error::UnsupportedAuthMethod(0x01))
        );
    }

    #[test]
    fn test_build_password_request_format() {
        let request = build_password_request("admin", "secret123").unwrap();

        assert_eq!(request[0], SOCKS5_AUTH_VERSION);
        assert_eq!(request[1], 5);
        assert_eq!(&request[2..7], b"admin");
        assert_eq!(request[7], 9);
        assert_eq!(&request[8..17], b"secret123");
    }

    #[test]
    fn test_build_password_request_utf8_lengths() {
        // byte length, not char count
        let request = build_password_request("Zoë", "pw").unwrap();
        assert_eq!(request[1], 4);
    }

    #[test]
    fn test_build_password_request_too_long() {
        let long = "x".repeat(256);
        assert_eq!(
            build_password_request(&long, "pw"),
            Err(Socks5Error::CredentialTooLong {
                field: "username",
                len: 256
            })
        );
        assert_eq!(
            build_password_request("user", &long),
            Err(Socks5Error::CredentialTooLong {
                field: "password",
                len: 256
            })
        );
    }

    #[tokio::test]
    async fn test_negotiate_method_password() {
        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05, 0x02])
            .build();

        let method = negotiate_method(&mut stream).await.unwrap();
        assert_eq!(method, AuthMethod::Password);
    }

    #[tokio::test]
    async fn test_negotiate_method_split_reply() {
        // reply delivered one byte at a time
        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05])
            .read(&[0x00])
            .build();

        let method = negotiate_method(&mut stream).await.unwrap();
        assert_eq!(method, AuthMethod::NoAuth);
    }

    #[tokio::test]
    async fn test_negotiate_method_bad_version() {
        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x04, 0x00])
            .build();

        let err = negotiate_method(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Socks5(Socks5Error::InvalidVersion(0x04))
        ));
    }

    #[tokio::test]
    async fn test_negotiate_method_no_acceptable() {
        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05, 0xFF])
            .build();

        let err = negotiate_method(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Socks5(Socks5Error::UnsupportedAuthMethod(0xFF))
        ));
    }

    #[tokio::test]
    async fn test_negotiate_method_eof_is_transport_error() {
        let mut stream = Builder::new()
            .write(&[0x05, 0x02, 0x00, 0x02])
            .read(&[0x05])
            .build();

        let err = negotiate_method(&mut stream).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_authenticate_password_rejected() {
        let mut stream = Builder::new()
            .write(&[0x01, 0x04, b'u', b's', b'e', b'r', 0x04, b'p', b'a', b's', b's'])
            .read(&[0x01, 0x01])
            .build();

        let err = authenticate_password(&mut stream, "user", "pass")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Socks5(Socks5Error::AuthenticationFailed(0x01))
        ));
    }
}
