//! Connection lifecycle observer
//!
//! The frontend reports what happens to each connection through this trait
//! instead of logging inline; embedders can plug in metrics or UI hooks.

use crate::error::BridgeError;
use crate::relay::{RelaySummary, SessionId};
use crate::socks::Destination;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Hooks invoked synchronously at fixed points of a connection's life
///
/// All methods default to no-ops. Implementations must be cheap: they run
/// on the connection task.
pub trait ProxyObserver: Send + Sync {
    /// A client connection was accepted
    fn connection_accepted(&self, _id: SessionId, _peer: SocketAddr) {}

    /// The upstream tunnel for a request is ready
    fn tunnel_established(&self, _id: SessionId, _destination: &Destination) {}

    /// An established tunnel finished
    fn tunnel_closed(&self, _summary: &RelaySummary) {}

    /// A request failed
    fn request_failed(&self, _id: SessionId, _error: &BridgeError) {}
}

/// Observer that turns events into `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProxyObserver for TracingObserver {
    fn connection_accepted(&self, id: SessionId, peer: SocketAddr) {
        debug!(session = %id, %peer, "Connection accepted");
    }

    fn tunnel_established(&self, id: SessionId, destination: &Destination) {
        info!(session = %id, %destination, "Tunnel established");
    }

    fn tunnel_closed(&self, summary: &RelaySummary) {
        info!(
            session = %summary.id,
            bytes_in = summary.bytes_in,
            bytes_out = summary.bytes_out,
            duration_ms = summary.duration.as_millis() as u64,
            end = %summary.end,
            "Tunnel closed"
        );
    }

    fn request_failed(&self, id: SessionId, error: &BridgeError) {
        warn!(session = %id, "Request failed: {}", error);
    }
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProxyObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayEnd;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProxyObserver for Recorder {
        fn tunnel_closed(&self, summary: &RelaySummary) {
            self.0.lock().unwrap().push(format!("closed {}", summary.id));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let recorder = Recorder::default();
        let id = SessionId(7);
        recorder.connection_accepted(id, "127.0.0.1:1".parse().unwrap());
        recorder.tunnel_established(id, &Destination::new("example.com", 80));
        recorder.tunnel_closed(&RelaySummary {
            id,
            bytes_in: 1,
            bytes_out: 2,
            duration: Duration::from_millis(3),
            end: RelayEnd::ClientClosed,
        });

        assert_eq!(*recorder.0.lock().unwrap(), vec!["closed #7".to_string()]);
    }
}
