//! The relay ties the hub, presence registry and router together and owns
//! the connection lifecycle.

use crate::connection::ConnectionId;
use crate::hub::{Hub, Outbox};
use crate::presence::PresenceRegistry;
use crate::router::SignalingRouter;
use huddle_protocol::ServerEvent;
use std::sync::Arc;
use tracing::debug;

/// Relay statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of presence entries.
    pub participant_count: usize,
    /// Signaling payloads delivered.
    pub signals_delivered: u64,
    /// Signaling payloads dropped.
    pub signals_dropped: u64,
}

/// One relay per server process.
#[derive(Debug)]
pub struct Relay {
    hub: Arc<Hub>,
    presence: Arc<PresenceRegistry>,
    router: SignalingRouter,
}

impl Relay {
    /// Create an empty relay.
    #[must_use]
    pub fn new() -> Self {
        let hub = Arc::new(Hub::new());
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&hub)));
        let router = SignalingRouter::new(Arc::clone(&presence), Arc::clone(&hub));
        Self {
            hub,
            presence,
            router,
        }
    }

    /// Get the connection hub.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Get the presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Get the signaling router.
    #[must_use]
    pub fn router(&self) -> &SignalingRouter {
        &self.router
    }

    /// Register a new connection and return its outbound queue.
    pub fn connect(&self, connection_id: ConnectionId) -> Outbox {
        self.hub.connect(connection_id)
    }

    /// Tear down a connection that closed for any reason.
    ///
    /// The connection stops receiving events first, then its presence entry
    /// (if any) is removed with the usual broadcasts to everyone else.
    /// Calling this more than once is harmless.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        let was_connected = self.hub.disconnect(connection_id);
        let entry = self.presence.on_disconnect(connection_id);
        debug!(
            connection = %connection_id,
            was_connected,
            was_present = entry.is_some(),
            "Relay: connection closed"
        );
    }

    /// Send an event to every connection.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.hub.broadcast(event)
    }

    /// Get relay statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let router = self.router.stats();
        RelayStats {
            connection_count: self.hub.connection_count(),
            participant_count: self.presence.count(),
            signals_delivered: router.delivered,
            signals_dropped: router.dropped,
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
