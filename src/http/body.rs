//! Message body transfer
//!
//! All readers take the buffer that already holds bytes read past the head,
//! drain it first and then continue from the socket.

use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest chunk-size or trailer line accepted
const MAX_LINE_LEN: usize = 4096;

/// Largest chunked request body buffered before forwarding
pub const MAX_CHUNKED_REQUEST_BODY: u64 = 8 * 1024 * 1024;

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// How a message body is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body
    Empty,
    /// Exactly this many bytes
    Length(u64),
    /// Chunked transfer coding
    Chunked,
    /// Everything until the sender closes
    UntilEof,
}

async fn fill<R>(reader: &mut R, buf: &mut BytesMut) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    buf.reserve(4096);
    if reader.read_buf(buf).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-body",
        ));
    }
    Ok(())
}

/// Read one CRLF-terminated line, without the terminator
async fn read_line<R>(reader: &mut R, buf: &mut BytesMut) -> io::Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut scanned = 0;
    loop {
        if let Some(pos) = buf[scanned..].windows(2).position(|w| w == b"\r\n") {
            let mut line = buf.split_to(scanned + pos + 2);
            line.truncate(scanned + pos);
            return Ok(line);
        }
        if buf.len() > MAX_LINE_LEN {
            return Err(invalid("chunk line too long"));
        }
        scanned = buf.len().saturating_sub(1);
        fill(reader, buf).await?;
    }
}

/// Copy exactly `len` bytes
pub async fn copy_exact<R, W>(
    reader: &mut R,
    buf: &mut BytesMut,
    writer: &mut W,
    len: u64,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = len;
    while remaining > 0 {
        if buf.is_empty() {
            fill(reader, buf).await?;
        }
        let take = remaining.min(buf.len() as u64) as usize;
        writer.write_all(&buf[..take]).await?;
        buf.advance(take);
        remaining -= take as u64;
    }
    Ok(len)
}

/// Copy everything until the reader closes
pub async fn copy_to_eof<R, W>(reader: &mut R, buf: &mut BytesMut, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let buffered = buf.len() as u64;
    writer.write_all(&buf[..]).await?;
    buf.clear();
    let copied = tokio::io::copy(reader, writer).await?;
    Ok(buffered + copied)
}

/// Decode a chunked body, writing only the payload
///
/// Trailers are consumed and dropped. Fails with `InvalidData` once the
/// payload exceeds `limit`.
pub async fn copy_chunked<R, W>(
    reader: &mut R,
    buf: &mut BytesMut,
    writer: &mut W,
    limit: Option<u64>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total: u64 = 0;
    loop {
        let line = read_line(reader, buf).await?;
        let size_field = line[..].split(|b: &u8| *b == b';').next().unwrap_or_default();
        let size_text = std::str::from_utf8(size_field)
            .map_err(|_| invalid("invalid chunk size"))?
            .trim();
        let size = u64::from_str_radix(size_text, 16).map_err(|_| invalid("invalid chunk size"))?;

        if size == 0 {
            while !read_line(reader, buf).await?.is_empty() {}
            return Ok(total);
        }

        total = total
            .checked_add(size)
            .ok_or_else(|| invalid("chunked body too large"))?;
        if limit.is_some_and(|limit| total > limit) {
            return Err(invalid("chunked body too large"));
        }

        copy_exact(reader, buf, writer, size).await?;
        if !read_line(reader, buf).await?.is_empty() {
            return Err(invalid("missing CRLF after chunk data"));
        }
    }
}

/// Buffer a whole chunked body, bounded by [`MAX_CHUNKED_REQUEST_BODY`]
pub async fn read_chunked<R>(reader: &mut R, buf: &mut BytesMut) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    copy_chunked(reader, buf, &mut body, Some(MAX_CHUNKED_REQUEST_BODY)).await?;
    Ok(body)
}

/// Copy a body of the given kind; returns the payload bytes written
pub async fn copy_body<R, W>(
    kind: BodyKind,
    reader: &mut R,
    buf: &mut BytesMut,
    writer: &mut W,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match kind {
        BodyKind::Empty => 0,
        BodyKind::Length(len) => copy_exact(reader, buf, writer, len).await?,
        BodyKind::Chunked => copy_chunked(reader, buf, writer, None).await?,
        BodyKind::UntilEof => copy_to_eof(reader, buf, writer).await?,
    };
    writer.flush().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_exact_uses_buffer_first() {
        let mut reader = tokio_test::io::Builder::new().read(b"lo wor").build();
        let mut buf = BytesMut::from(&b"hel"[..]);
        let mut out = Vec::new();

        let n = copy_exact(&mut reader, &mut buf, &mut out, 9).await.unwrap();
        assert_eq!(n, 9);
        assert_eq!(out, b"hello wor");
    }

    #[tokio::test]
    async fn test_copy_exact_leaves_surplus() {
        let mut reader = tokio_test::io::Builder::new().build();
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        let mut out = Vec::new();

        copy_exact(&mut reader, &mut buf, &mut out, 4).await.unwrap();
        assert_eq!(out, b"abcd");
        assert_eq!(&buf[..], b"ef");
    }

    #[tokio::test]
    async fn test_copy_exact_early_eof() {
        let mut reader = tokio_test::io::Builder::new().read(b"ab").build();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();

        let err = copy_exact(&mut reader, &mut buf, &mut out, 5).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_copy_chunked_split_across_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"5\r\nhel")
            .read(b"lo\r\n6;ext=1\r\n world\r")
            .read(b"\n0\r\nX-Trailer: 1\r\n\r\n")
            .build();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();

        let n = copy_chunked(&mut reader, &mut buf, &mut out, None).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(out, b"hello world");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_copy_chunked_rejects_bad_size() {
        let mut reader = tokio_test::io::Builder::new().read(b"zz\r\n").build();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();

        let err = copy_chunked(&mut reader, &mut buf, &mut out, None).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_read_chunked_enforces_limit() {
        let mut reader = tokio_test::io::Builder::new().build();
        let mut buf = BytesMut::from(&b"900001\r\n"[..]);

        let err = read_chunked(&mut reader, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_copy_body_until_eof() {
        let mut reader = tokio_test::io::Builder::new().read(b" tail").build();
        let mut buf = BytesMut::from(&b"head"[..]);
        let mut out = Vec::new();

        let n = copy_body(BodyKind::UntilEof, &mut reader, &mut buf, &mut out)
            .await
            .unwrap();
        assert_eq!(n, 9);
        assert_eq!(out, b"head tail");
    }
}
