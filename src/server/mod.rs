//! Proxy server lifecycle
//!
//! [`ProxyServer`] owns the listening socket, the accept loop and every
//! connection task. It can be started, stopped and started again; stats are
//! reset on each start.

mod observer;
mod registry;
mod shutdown;
mod stats;

pub use observer::{NoopObserver, ProxyObserver, TracingObserver};
pub use registry::{ConnectionGuard, SessionInfo, SessionRegistry};
pub use shutdown::{channel as shutdown_channel, Shutdown};
pub use stats::{ProxyStats, StatsSnapshot};

use crate::config::{Config, ServerConfig, UpstreamProxyConfig};
use crate::error::BridgeError;
use crate::http::HttpProxyFrontend;
use crate::transport::{create_connector, ConnectorDyn, SocketOpts};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Address the server is listening on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundAddress {
    /// Bound IP, as text
    pub host: String,
    /// Bound port (the OS-assigned one when 0 was requested)
    pub port: u16,
    /// Proxy URL clients can be pointed at
    pub url: String,
}

impl BoundAddress {
    fn from_socket_addr(addr: SocketAddr) -> Self {
        let host = addr.ip().to_string();
        let url = match addr.ip() {
            IpAddr::V6(_) => format!("http://[{}]:{}", host, addr.port()),
            IpAddr::V4(_) => format!("http://{}:{}", host, addr.port()),
        };
        BoundAddress {
            host,
            port: addr.port(),
            url,
        }
    }

    /// As a socket address
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

/// Upstream description safe to show (no password)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamSummary {
    /// Upstream host
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Whether credentials are configured
    pub has_auth: bool,
}

/// Status report of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyStatus {
    /// Whether the server is accepting connections
    pub running: bool,
    /// Listening address while running
    pub bound: Option<BoundAddress>,
    /// Configured upstream
    pub upstream: UpstreamSummary,
    /// Connect strategy name
    pub strategy: &'static str,
    /// Counters
    pub stats: StatsSnapshot,
}

struct Running {
    bound: BoundAddress,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// HTTP proxy server tunnelling through the upstream
pub struct ProxyServer {
    upstream: Arc<UpstreamProxyConfig>,
    config: ServerConfig,
    connector: Arc<dyn ConnectorDyn>,
    observer: Arc<dyn ProxyObserver>,
    stats: Arc<ProxyStats>,
    registry: Arc<SessionRegistry>,
    state: Mutex<Option<Running>>,
}

impl ProxyServer {
    /// Create a stopped server
    ///
    /// The connect strategy is chosen here, once, from `config.strategy`.
    pub fn new(upstream: UpstreamProxyConfig, config: ServerConfig) -> Self {
        let upstream = Arc::new(upstream);
        let connector = create_connector(&config, upstream.clone());
        ProxyServer {
            upstream,
            config,
            connector,
            observer: Arc::new(TracingObserver),
            stats: Arc::new(ProxyStats::new()),
            registry: Arc::new(SessionRegistry::new()),
            state: Mutex::new(None),
        }
    }

    /// Replace the connection observer
    pub fn with_observer(mut self, observer: Arc<dyn ProxyObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the connector (the strategy chosen from the config is dropped)
    pub fn with_connector(mut self, connector: Arc<dyn ConnectorDyn>) -> Self {
        self.connector = connector;
        self
    }

    /// Upstream configuration
    pub fn upstream(&self) -> &UpstreamProxyConfig {
        &self.upstream
    }

    /// Bind `bind_ip:port` (0 = ephemeral) and start accepting
    pub async fn start(&self, bind_ip: IpAddr, port: u16) -> Result<BoundAddress, BridgeError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let addr = SocketAddr::new(bind_ip, port);
        let listener = TcpListener::bind(addr).await.map_err(|source| BridgeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr().map_err(|source| BridgeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let bound = BoundAddress::from_socket_addr(local);

        self.stats.reset();

        let frontend = HttpProxyFrontend::new(
            self.connector.clone(),
            self.observer.clone(),
            self.stats.clone(),
        )
        .with_socket_opts(SocketOpts::from_tcp_config(&self.config.tcp))
        .with_request_timeout(self.config.request_timeout());

        let (shutdown_tx, shutdown) = shutdown_channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::new(frontend),
            self.registry.clone(),
            self.stats.clone(),
            shutdown,
            self.config.shutdown_grace(),
        ));

        info!(
            "Proxy listening on {} ({} via {})",
            bound.url,
            self.connector.name_dyn(),
            self.upstream.addr()
        );
        *state = Some(Running {
            bound: bound.clone(),
            shutdown_tx,
            accept_task,
        });
        Ok(bound)
    }

    /// Start on the address from the server configuration
    pub async fn start_configured(&self) -> Result<BoundAddress, BridgeError> {
        self.start(self.config.bind_addr, self.config.bind_port).await
    }

    /// Stop accepting, close every live session and wait for the listener
    ///
    /// Does nothing when the server is not running.
    pub async fn stop(&self) {
        let Some(running) = self.state.lock().await.take() else {
            return;
        };

        info!("Stopping proxy on {}", running.bound.url);
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }
        info!("Proxy on {} stopped", running.bound.url);
    }

    /// Whether the server is accepting connections
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Address the server is listening on, if running
    pub async fn bound_address(&self) -> Option<BoundAddress> {
        self.state.lock().await.as_ref().map(|r| r.bound.clone())
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Live sessions, for diagnostics
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.sessions()
    }

    /// Full status report
    pub async fn status(&self) -> ProxyStatus {
        let bound = self.bound_address().await;
        ProxyStatus {
            running: bound.is_some(),
            bound,
            upstream: UpstreamSummary {
                host: self.upstream.host.clone(),
                port: self.upstream.port,
                has_auth: self.upstream.has_credentials(),
            },
            strategy: self.connector.name_dyn(),
            stats: self.stats.snapshot(),
        }
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("upstream", &self.upstream)
            .field("config", &self.config)
            .field("connector", &self.connector.name_dyn())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    frontend: Arc<HttpProxyFrontend>,
    registry: Arc<SessionRegistry>,
    stats: Arc<ProxyStats>,
    mut shutdown: Shutdown,
    grace: Duration,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let guard = registry.register(peer, &stats);
                    frontend.observer().connection_accepted(guard.id(), peer);

                    let frontend = frontend.clone();
                    let shutdown = shutdown.clone();
                    tasks.spawn(async move {
                        frontend.handle_connection(guard, stream, shutdown).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    drop(listener);
    debug!("Listener closed, {} connection task(s) to drain", tasks.len());

    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(
            "{} connection task(s) still running after {:?}, aborting",
            tasks.len(),
            grace
        );
        tasks.shutdown().await;
    }
}

/// Run a server from `config` until `shutdown` fires
pub async fn run_server(config: Config, mut shutdown: Shutdown) -> Result<(), BridgeError> {
    let server = ProxyServer::new(config.upstream, config.server);
    server.start_configured().await?;

    shutdown.triggered().await;
    server.stop().await;

    let stats = server.stats();
    info!(
        "Served {} request(s), {} error(s), {} bytes in, {} bytes out",
        stats.requests, stats.errors, stats.bytes_in, stats.bytes_out
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn server() -> ProxyServer {
        ProxyServer::new(
            UpstreamProxyConfig::new("127.0.0.1", 1),
            ServerConfig::default(),
        )
    }

    #[test]
    fn test_bound_address_url() {
        let bound = BoundAddress::from_socket_addr("127.0.0.1:8080".parse().unwrap());
        assert_eq!(bound.url, "http://127.0.0.1:8080");

        let bound = BoundAddress::from_socket_addr("[::1]:8080".parse().unwrap());
        assert_eq!(bound.host, "::1");
        assert_eq!(bound.url, "http://[::1]:8080");
        assert_eq!(bound.socket_addr(), Some("[::1]:8080".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_start_ephemeral_and_stop() {
        let server = server();
        let bound = server.start(LOCALHOST, 0).await.unwrap();
        assert_ne!(bound.port, 0);
        assert_eq!(bound.host, "127.0.0.1");
        assert!(server.is_running().await);

        server.stop().await;
        assert!(!server.is_running().await);
        assert!(TcpStream::connect(bound.socket_addr().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = server();
        server.start(LOCALHOST, 0).await.unwrap();
        assert!(matches!(
            server.start(LOCALHOST, 0).await,
            Err(BridgeError::AlreadyRunning)
        ));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = server();
        server.stop().await;
        server.start(LOCALHOST, 0).await.unwrap();
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let taken = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = server().start(LOCALHOST, port).await.unwrap_err();
        assert!(matches!(err, BridgeError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_status_hides_password() {
        let upstream =
            UpstreamProxyConfig::new("proxy.example", 1080).with_credentials("user", "secret");
        let server = ProxyServer::new(upstream, ServerConfig::default());

        let status = server.status().await;
        assert!(!status.running);
        assert!(status.upstream.has_auth);
        assert_eq!(status.strategy, "socks5");
        assert!(!format!("{:?}", status).contains("secret"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_yields_502() {
        let server = server();
        let bound = server.start(LOCALHOST, 0).await.unwrap();

        let mut client = TcpStream::connect(bound.socket_addr().unwrap()).await.unwrap();
        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));

        server.stop().await;
        let stats = server.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.active_connections, 0);
    }
}
