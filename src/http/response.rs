//! Status responses written by the proxy itself

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Reply sent once a CONNECT tunnel is ready
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Interim reply telling the client to send its request body
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        408 => "Request Timeout",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// Build an error response with a short plain-text body
pub fn error_response(status: u16, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    )
    .into_bytes()
}

/// Write an error response and flush it
pub async fn write_error<W>(writer: &mut W, status: u16, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&error_response(status, message)).await?;
    writer.flush().await
}
