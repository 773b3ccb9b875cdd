//! In-process transport.
//!
//! A [`MemoryConnection`] is driven by the server exactly like a WebSocket,
//! while the test (or embedding application) holds the [`MemoryPeer`] end.

use async_trait::async_trait;
use huddle_protocol::{ClientEvent, ServerEvent};
use std::time::Instant;
use tokio::sync::mpsc;

use crate::traits::{Connection, TransportError};

/// Create a connected pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let connection = MemoryConnection {
        inbound: client_rx,
        outbound: server_tx,
        is_open: true,
        last_seen: Instant::now(),
    };
    let peer = MemoryPeer {
        outbound: Some(client_tx),
        inbound: server_rx,
    };
    (connection, peer)
}

/// Server side of an in-process connection.
#[derive(Debug)]
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<ClientEvent>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    is_open: bool,
    last_seen: Instant,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        match self.inbound.recv().await {
            Some(event) => {
                self.last_seen = Instant::now();
                Ok(Some(event))
            }
            None => {
                self.is_open = false;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(event.clone())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.inbound.close();
        Ok(())
    }

    fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

/// Client side of an in-process connection.
#[derive(Debug)]
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl MemoryPeer {
    /// Send an event to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the peer hung up.
    pub fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(event)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next event from the server.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    /// Take the next event from the server if one is queued.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.inbound.try_recv().ok()
    }

    /// Stop sending; the server sees a clean close.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }
}
