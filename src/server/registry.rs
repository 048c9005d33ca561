//! Registry of live client sessions
//!
//! Every accepted connection is tracked until its task ends. The entry and
//! the active-connection count are released together by [`ConnectionGuard`],
//! which also runs when the task is aborted during shutdown.

use super::ProxyStats;
use crate::relay::SessionId;
use crate::socks::Destination;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Diagnostic view of one live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Client address
    pub peer: SocketAddr,
    /// Accept time
    pub accepted_at: SystemTime,
    /// Destination, once the request was parsed
    pub destination: Option<Destination>,
}

/// Sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a newly accepted connection
    pub fn register(self: &Arc<Self>, peer: SocketAddr, stats: &Arc<ProxyStats>) -> ConnectionGuard {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().insert(
            id,
            SessionInfo {
                id,
                peer,
                accepted_at: SystemTime::now(),
                destination: None,
            },
        );
        stats.connection_opened();

        ConnectionGuard {
            id,
            registry: self.clone(),
            stats: stats.clone(),
        }
    }

    /// Live sessions ordered by id
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by_key(|info| info.id);
        sessions
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Keeps a session registered and counted as active while alive
#[derive(Debug)]
pub struct ConnectionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
    stats: Arc<ProxyStats>,
}

impl ConnectionGuard {
    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Record the destination the client asked for
    pub fn set_destination(&self, destination: &Destination) {
        if let Some(info) = self.registry.lock().get_mut(&self.id) {
            info.destination = Some(destination.clone());
        }
    }

    /// Shared stats
    pub fn stats(&self) -> &Arc<ProxyStats> {
        &self.stats
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        self.stats.connection_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_guard_releases_once() {
        let registry = Arc::new(SessionRegistry::new());
        let stats = Arc::new(ProxyStats::new());

        let first = registry.register(peer(), &stats);
        let second = registry.register(peer(), &stats);
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(stats.snapshot().active_connections, 2);

        drop(first);
        assert_eq!(registry.len(), 1);
        assert_eq!(stats.snapshot().active_connections, 1);

        drop(second);
        assert!(registry.is_empty());
        assert_eq!(stats.snapshot().active_connections, 0);
    }

    #[test]
    fn test_set_destination() {
        let registry = Arc::new(SessionRegistry::new());
        let stats = Arc::new(ProxyStats::new());
        let guard = registry.register(peer(), &stats);

        guard.set_destination(&Destination::new("example.com", 443));
        let sessions = registry.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(
            sessions[0].destination,
            Some(Destination::new("example.com", 443))
        );
    }

    #[tokio::test]
    async fn test_guard_released_when_task_aborted() {
        let registry = Arc::new(SessionRegistry::new());
        let stats = Arc::new(ProxyStats::new());
        let guard = registry.register(peer(), &stats);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        handle.abort();
        let _ = handle.await;

        assert!(registry.is_empty());
        assert_eq!(stats.snapshot().active_connections, 0);
    }
}
