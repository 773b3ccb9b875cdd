//! Presence tracking for Huddle.
//!
//! The presence registry records which participant identity each connection
//! joined under, and tells every connected client whenever that set changes.

use crate::connection::ConnectionId;
use crate::hub::Hub;
use huddle_protocol::ServerEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A live binding between a connection and a participant identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// Identity the connection joined under.
    pub identity: String,
    /// When the connection last joined, in milliseconds since the epoch.
    pub joined_at: u64,
    /// Monotonic join sequence number, used to pick between duplicates.
    join_seq: u64,
}

/// Entries in list order. A rejoin updates the entry in place.
#[derive(Debug, Default)]
struct PresenceTable {
    entries: Vec<PresenceEntry>,
    next_seq: u64,
}

impl PresenceTable {
    /// Returns `true` if the connection had no entry yet.
    fn join(&mut self, connection_id: &ConnectionId, identity: String) -> bool {
        let join_seq = self.next_seq;
        self.next_seq += 1;
        let joined_at = now_millis();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| &e.connection_id == connection_id)
        {
            entry.identity = identity;
            entry.joined_at = joined_at;
            entry.join_seq = join_seq;
            return false;
        }

        self.entries.push(PresenceEntry {
            connection_id: connection_id.clone(),
            identity,
            joined_at,
            join_seq,
        });
        true
    }

    fn remove(&mut self, connection_id: &ConnectionId) -> Option<PresenceEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| &e.connection_id == connection_id)?;
        Some(self.entries.remove(index))
    }

    fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.identity.clone()).collect()
    }

    /// The most recently joined entry wins when identities collide.
    fn resolve(&self, identity: &str) -> Option<&PresenceEntry> {
        self.entries
            .iter()
            .filter(|e| e.identity == identity)
            .max_by_key(|e| e.join_seq)
    }
}

/// Presence registry shared by every connection of a server process.
///
/// All mutations take a single lock and enqueue their broadcasts before
/// releasing it, so broadcasts reach each connection in mutation order and
/// never describe a state the registry has already left.
#[derive(Debug)]
pub struct PresenceRegistry {
    table: Mutex<PresenceTable>,
    hub: Arc<Hub>,
}

impl PresenceRegistry {
    /// Create an empty registry broadcasting through the given hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            table: Mutex::new(PresenceTable::default()),
            hub,
        }
    }

    /// Join presence under `identity`, replacing any earlier identity of
    /// this connection.
    ///
    /// Broadcasts `audio-users` to every connection and `new-audio-user` to
    /// every other connection. Returns `true` if this is a new entry.
    pub fn join(&self, connection_id: &ConnectionId, identity: impl Into<String>) -> bool {
        let identity = identity.into();
        let mut table = self.table.lock();

        let is_new = table.join(connection_id, identity.clone());
        self.hub.broadcast(ServerEvent::AudioUsers(table.identities()));
        self.hub
            .broadcast_except(connection_id, ServerEvent::NewAudioUser(identity.clone()));

        debug!(
            connection = %connection_id,
            identity = %identity,
            present = table.entries.len(),
            rejoin = !is_new,
            "Presence: joined"
        );
        is_new
    }

    /// Leave presence.
    ///
    /// Broadcasts `audio-users` to every connection and `audio-left` to every
    /// other connection. Does nothing, and broadcasts nothing, if the
    /// connection has no entry. Returns the removed entry, if any.
    pub fn leave(&self, connection_id: &ConnectionId) -> Option<PresenceEntry> {
        let mut table = self.table.lock();

        let entry = table.remove(connection_id)?;
        self.hub.broadcast(ServerEvent::AudioUsers(table.identities()));
        self.hub
            .broadcast_except(connection_id, ServerEvent::AudioLeft(entry.identity.clone()));

        debug!(
            connection = %connection_id,
            identity = %entry.identity,
            present = table.entries.len(),
            "Presence: left"
        );
        Some(entry)
    }

    /// Clean up after a severed connection.
    ///
    /// Same effect as [`leave`](Self::leave); safe to call after `leave`.
    pub fn on_disconnect(&self, connection_id: &ConnectionId) -> Option<PresenceEntry> {
        let entry = self.leave(connection_id);
        if entry.is_none() {
            debug!(connection = %connection_id, "Presence: disconnect without entry");
        }
        entry
    }

    /// Snapshot of present identities, in list order. Duplicates are kept.
    #[must_use]
    pub fn current_list(&self) -> Vec<String> {
        self.table.lock().identities()
    }

    /// Find the connection currently reachable under `identity`.
    #[must_use]
    pub fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.table
            .lock()
            .resolve(identity)
            .map(|e| e.connection_id.clone())
    }

    /// Get the identity a connection joined under.
    #[must_use]
    pub fn identity_of(&self, connection_id: &ConnectionId) -> Option<String> {
        self.table
            .lock()
            .entries
            .iter()
            .find(|e| &e.connection_id == connection_id)
            .map(|e| e.identity.clone())
    }

    /// Get the number of present entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }
}
