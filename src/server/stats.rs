//! Process-wide proxy counters

use crate::relay::TrafficCounters;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters mutated by every connection task
#[derive(Debug, Default)]
pub struct ProxyStats {
    requests: AtomicU64,
    errors: AtomicU64,
    active_connections: AtomicI64,
    traffic: Arc<TrafficCounters>,
}

impl ProxyStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection that delivered a request
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed attempt
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn connection_closed(&self) {
        let previous = self.active_connections.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "active connection count went negative");
    }

    /// Byte counters aggregated over all sessions
    pub fn traffic(&self) -> Arc<TrafficCounters> {
        self.traffic.clone()
    }

    /// Zero the request, error and traffic counters
    ///
    /// The active count is left alone: it is owned by live connection guards.
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.traffic.reset();
    }

    /// Copy the counters into a plain snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Acquire),
            bytes_in: self.traffic.bytes_in(),
            bytes_out: self.traffic.bytes_out(),
        }
    }
}

/// Point-in-time copy of [`ProxyStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connections that sent at least one byte of request
    pub requests: u64,
    /// Failed attempts
    pub errors: u64,
    /// Connections currently being handled
    pub active_connections: i64,
    /// Bytes received from clients
    pub bytes_in: u64,
    /// Bytes delivered to clients
    pub bytes_out: u64,
}
