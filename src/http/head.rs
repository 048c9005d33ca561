//! HTTP/1.x message heads
//!
//! Heads are accumulated in a caller-owned buffer until `httparse` reports a
//! complete message; bytes past the head stay in the buffer for the body or
//! the tunnel.

use super::headers::Header;
use crate::error::BridgeError;
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest head accepted from either side
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Most header fields accepted in one head
pub const MAX_HEADERS: usize = 100;

/// Parsed request line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, as sent
    pub method: String,
    /// Request target, as sent
    pub target: String,
    /// Minor version of HTTP/1.x
    pub version: u8,
    /// Header fields in arrival order
    pub headers: Vec<Header>,
}

impl RequestHead {
    /// Whether this is a `CONNECT` request
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Whether this is a `HEAD` request
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

/// Parsed status line and headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Minor version of HTTP/1.x
    pub version: u8,
    /// Status code
    pub code: u16,
    /// Reason phrase
    pub reason: String,
    /// Header fields in arrival order
    pub headers: Vec<Header>,
}

impl ResponseHead {
    /// Interim (1xx) responses other than `101 Switching Protocols`
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.code) && self.code != 101
    }

    /// Serialize as an HTTP/1.1 head
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.code, self.reason).into_bytes();
        for header in &self.headers {
            header.write_to(&mut out);
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn owned_headers(headers: &[httparse::Header<'_>]) -> Vec<Header> {
    headers
        .iter()
        .map(|h| Header::new(h.name, h.value))
        .collect()
}

/// Try to parse a request head from the start of `buf`
///
/// Returns the head and its length once complete, `None` while partial.
pub fn parse_request(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, BridgeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            return Err(BridgeError::MalformedRequest(format!(
                "invalid request head: {}",
                e
            )))
        }
    };

    let (Some(method), Some(target), Some(version)) = (req.method, req.path, req.version) else {
        return Err(BridgeError::MalformedRequest(
            "incomplete request line".to_string(),
        ));
    };

    let head = RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version,
        headers: owned_headers(req.headers),
    };
    Ok(Some((head, len)))
}

/// Try to parse a response head from the start of `buf`
pub fn parse_response(buf: &[u8]) -> io::Result<Option<(ResponseHead, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);

    let len = match res.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid response head: {}", e),
            ))
        }
    };

    let (Some(version), Some(code)) = (res.version, res.code) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "incomplete status line",
        ));
    };

    let head = ResponseHead {
        version,
        code,
        reason: res.reason.unwrap_or_default().to_string(),
        headers: owned_headers(res.headers),
    };
    Ok(Some((head, len)))
}

/// Read a request head from the client
///
/// Returns `None` if the client closed without sending anything. Leftover
/// bytes after the head remain in `buf`.
pub async fn read_request_head<R>(
    reader: &mut R,
    buf: &mut BytesMut,
) -> Result<Option<RequestHead>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            if let Some((head, len)) = parse_request(&buf[..])? {
                buf.advance(len);
                return Ok(Some(head));
            }
            if buf.len() >= MAX_HEAD_SIZE {
                return Err(BridgeError::MalformedRequest(
                    "request head too large".to_string(),
                ));
            }
        }

        buf.reserve(4096);
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(BridgeError::MalformedRequest(
                "connection closed before the request head was complete".to_string(),
            ));
        }
    }
}

/// Read a response head from the upstream
pub async fn read_response_head<R>(reader: &mut R, buf: &mut BytesMut) -> io::Result<ResponseHead>
where
    R: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            if let Some((head, len)) = parse_response(&buf[..])? {
                buf.advance(len);
                return Ok(head);
            }
            if buf.len() >= MAX_HEAD_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "response head too large",
                ));
            }
        }

        buf.reserve(4096);
        if reader.read_buf(buf).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream closed before the response head was complete",
            ));
        }
    }
}
