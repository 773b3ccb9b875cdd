//! Connection hub for Huddle.
//!
//! The hub owns one outbound queue per live connection. Everything the core
//! sends (broadcasts and point-to-point forwards) goes through it, so each
//! connection sees its events in the order they were enqueued.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use huddle_protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving side of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Registry of live connections and their outbound queues.
#[derive(Debug, Default)]
pub struct Hub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<ServerEvent>>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its outbound queue.
    ///
    /// Registering an ID twice replaces the previous queue.
    pub fn connect(&self, connection_id: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection_id, "Connection registered");
        self.connections.insert(connection_id, tx);
        rx
    }

    /// Remove a connection.
    ///
    /// Returns `true` if the connection was registered.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Connection unregistered");
        }
        removed
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Send an event to a single connection.
    ///
    /// Returns `false` if the connection is unknown or its queue is closed.
    pub fn send_to(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(tx) => tx.send(Arc::new(event)).is_ok(),
            None => false,
        }
    }

    /// Send an event to every connection.
    ///
    /// Returns the number of queues the event was pushed to.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.fan_out(None, event)
    }

    /// Send an event to every connection except one.
    pub fn broadcast_except(&self, except: &ConnectionId, event: ServerEvent) -> usize {
        self.fan_out(Some(except), event)
    }

    fn fan_out(&self, except: Option<&ConnectionId>, event: ServerEvent) -> usize {
        let name = event.name();
        let event = Arc::new(event);
        let count = self
            .connections
            .iter()
            .filter(|entry| Some(entry.key()) != except)
            .filter(|entry| entry.value().send(Arc::clone(&event)).is_ok())
            .count();
        trace!(event = name, recipients = count, "Broadcast");
        count
    }
}
