//! SOCKS5 CONNECT request and reply
//!
//! Builds the CONNECT request (always domain-name addressing) and parses the
//! server's reply, consuming the variable-length bound address so that the
//! first relayed byte is the first byte from the destination.

use crate::error::{BridgeError, Socks5Error};
use crate::socks::consts::*;
use crate::socks::types::{BoundAddr, Destination};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Build a CONNECT request
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 5  |  1  | X'00' |  3   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn build_connect_request(dest: &Destination) -> Result<Vec<u8>, Socks5Error> {
    let addr = dest.to_bytes()?;

    let mut request = Vec::with_capacity(3 + addr.len());
    request.push(SOCKS5_VERSION);
    request.push(SOCKS5_CMD_TCP_CONNECT);
    request.push(SOCKS5_RESERVED);
    request.extend_from_slice(&addr);
    Ok(request)
}

/// Send a CONNECT request for `dest`
pub async fn send_connect<S>(stream: &mut S, dest: &Destination) -> Result<(), BridgeError>
where
    S: AsyncWrite + Unpin,
{
    let request = build_connect_request(dest)?;
    stream.write_all(&request).await?;
    stream.flush().await?;
    Ok(())
}

/// Read and validate the CONNECT reply
///
/// # SOCKS5 Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn read_connect_reply<S>(stream: &mut S) -> Result<BoundAddr, BridgeError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(Socks5Error::InvalidVersion(header[0]).into());
    }
    if header[1] != SOCKS5_REPLY_SUCCEEDED {
        return Err(Socks5Error::ConnectFailed(header[1]).into());
    }

    read_bound_addr(stream, header[3]).await
}

async fn read_bound_addr<S>(stream: &mut S, addr_type: u8) -> Result<BoundAddr, BridgeError>
where
    S: AsyncRead + Unpin,
{
    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok(BoundAddr::ip(IpAddr::V4(ip), port))
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut buf = [0u8; 18];
            stream.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok(BoundAddr::ip(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut buf = vec![0u8; len + 2];
            stream.read_exact(&mut buf).await?;
            let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
            let domain = String::from_utf8_lossy(&buf[..len]).into_owned();
            Ok(BoundAddr::Domain(domain, port))
        }
        other => Err(Socks5Error::AddressTypeNotSupported(other).into()),
    }
}
