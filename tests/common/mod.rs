//! Test utilities and mocks for Sockbridge
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use sockbridge::config::{ServerConfig, UpstreamProxyConfig};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Create a connected TCP stream pair for testing
pub async fn create_tcp_stream_pair() -> (TcpStream, TcpStream) {
    let (listener, addr) = create_test_listener().await;

    let connect_fut = TcpStream::connect(addr);
    let accept_fut = listener.accept();

    let (client_stream, accepted) = tokio::join!(connect_fut, accept_fut);

    (client_stream.unwrap(), accepted.unwrap().0)
}

/// A port nothing listens on
pub async fn closed_port() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr
}

/// Server config with short timeouts
pub fn fast_server_config() -> ServerConfig {
    ServerConfig {
        dial_timeout_ms: 2_000,
        handshake_timeout_ms: 2_000,
        request_timeout_ms: 2_000,
        shutdown_grace_ms: 500,
        ..Default::default()
    }
}

/// What the mock upstream does once a CONNECT succeeded
#[derive(Debug, Clone)]
pub enum AfterConnect {
    /// Echo every byte back
    Echo,
    /// Read one request head, answer with the canned bytes, close
    Respond(Vec<u8>),
}

/// Scripted SOCKS5 upstream
#[derive(Debug, Clone)]
pub struct MockSocksUpstream {
    credentials: Option<(String, String)>,
    reply_code: u8,
    refused_hosts: Vec<String>,
    after_connect: AfterConnect,
}

/// Handle to a running mock upstream
pub struct MockUpstreamHandle {
    /// Listening address
    pub addr: SocketAddr,
    /// `host:port` of every CONNECT request received
    pub connects: Arc<Mutex<Vec<String>>>,
    /// Request heads received in `Respond` mode
    pub requests: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl MockUpstreamHandle {
    /// Upstream config pointing at this mock
    pub fn upstream_config(&self) -> UpstreamProxyConfig {
        UpstreamProxyConfig::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// CONNECT targets seen so far
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    /// Request heads seen so far, as text
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .collect()
    }
}

impl Drop for MockUpstreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Default for MockSocksUpstream {
    fn default() -> Self {
        MockSocksUpstream {
            credentials: None,
            reply_code: 0x00,
            refused_hosts: Vec::new(),
            after_connect: AfterConnect::Echo,
        }
    }
}

impl MockSocksUpstream {
    /// Create a no-auth echoing upstream
    pub fn new() -> Self {
        Self::default()
    }

    /// Require username/password
    pub fn require_auth(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Answer every CONNECT with this reply code
    pub fn reply_code(mut self, code: u8) -> Self {
        self.reply_code = code;
        self
    }

    /// Answer CONNECT to `host` with "connection refused"
    pub fn refuse_host(mut self, host: &str) -> Self {
        self.refused_hosts.push(host.to_string());
        self
    }

    /// Behave as an HTTP origin after CONNECT
    pub fn respond_with(mut self, response: &[u8]) -> Self {
        self.after_connect = AfterConnect::Respond(response.to_vec());
        self
    }

    /// Bind an ephemeral port and serve until dropped
    pub async fn start(self) -> MockUpstreamHandle {
        let (listener, addr) = create_test_listener().await;
        let connects = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let script = Arc::new(self);
        let task = {
            let connects = connects.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let script = script.clone();
                    let connects = connects.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = script.serve(stream, connects, requests).await;
                    });
                }
            })
        };

        MockUpstreamHandle {
            addr,
            connects,
            requests,
            task,
        }
    }

    async fn serve(
        &self,
        mut stream: TcpStream,
        connects: Arc<Mutex<Vec<String>>>,
        requests: Arc<Mutex<Vec<Vec<u8>>>>,
    ) -> std::io::Result<()> {
        // Greeting
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        let mut methods = vec![0u8; head[1] as usize];
        stream.read_exact(&mut methods).await?;

        match &self.credentials {
            Some((username, password)) => {
                if !methods.contains(&0x02) {
                    stream.write_all(&[0x05, 0xFF]).await?;
                    return Ok(());
                }
                stream.write_all(&[0x05, 0x02]).await?;

                let mut ver_ulen = [0u8; 2];
                stream.read_exact(&mut ver_ulen).await?;
                let mut user = vec![0u8; ver_ulen[1] as usize];
                stream.read_exact(&mut user).await?;
                let mut plen = [0u8; 1];
                stream.read_exact(&mut plen).await?;
                let mut pass = vec![0u8; plen[0] as usize];
                stream.read_exact(&mut pass).await?;

                if user != username.as_bytes() || pass != password.as_bytes() {
                    stream.write_all(&[0x01, 0x01]).await?;
                    return Ok(());
                }
                stream.write_all(&[0x01, 0x00]).await?;
            }
            None => stream.write_all(&[0x05, 0x00]).await?,
        }

        // CONNECT request
        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await?;
        let host = match request[3] {
            0x01 => {
                let mut ip = [0u8; 4];
                stream.read_exact(&mut ip).await?;
                std::net::Ipv4Addr::from(ip).to_string()
            }
            0x03 => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                stream.read_exact(&mut name).await?;
                String::from_utf8_lossy(&name).into_owned()
            }
            0x04 => {
                let mut ip = [0u8; 16];
                stream.read_exact(&mut ip).await?;
                std::net::Ipv6Addr::from(ip).to_string()
            }
            _ => return Ok(()),
        };
        let port = stream.read_u16().await?;
        connects.lock().unwrap().push(format!("{}:{}", host, port));

        let code = if self.refused_hosts.contains(&host) {
            0x05
        } else {
            self.reply_code
        };
        stream
            .write_all(&[0x05, code, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38])
            .await?;
        if code != 0x00 {
            return Ok(());
        }

        match &self.after_connect {
            AfterConnect::Echo => {
                let (mut reader, mut writer) = stream.split();
                tokio::io::copy(&mut reader, &mut writer).await?;
            }
            AfterConnect::Respond(response) => {
                let head = read_until_blank_line(&mut stream).await?;
                requests.lock().unwrap().push(head);
                stream.write_all(response).await?;
                stream.shutdown().await?;
            }
        }
        Ok(())
    }
}

/// Read bytes up to and including the first `\r\n\r\n`
pub async fn read_until_blank_line<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if reader.read(&mut byte).await? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    Ok(head)
}

/// Open a CONNECT tunnel through the proxy and return the stream after the 200
pub async fn open_tunnel(proxy: SocketAddr, target: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", target, target).as_bytes())
        .await
        .unwrap();
    let head = read_until_blank_line(&mut stream).await.unwrap();
    assert_eq!(head, b"HTTP/1.1 200 Connection Established\r\n\r\n");
    stream
}

/// Send raw bytes and read until the proxy closes
pub async fn roundtrip(proxy: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_tcp_stream_pair() {
        let (mut a, mut b) = create_tcp_stream_pair().await;
        a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }
}
