//! Transport abstraction traits for Huddle.
//!
//! The server drives every client through [`Connection`], so the session
//! logic does not care whether events arrive over a WebSocket or an
//! in-process channel.

use async_trait::async_trait;
use huddle_protocol::{ClientEvent, ProtocolError, ServerEvent};
use std::time::Instant;
use thiserror::Error;

/// Encoding a connection uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON envelopes in text messages.
    #[default]
    Text,
    /// Length-prefixed MessagePack envelopes in binary messages.
    Binary,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Inbound message exceeded the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A message could not be decoded as an event.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether the connection can keep going after this error.
    ///
    /// Only undecodable events are recoverable: the offending message is
    /// discarded and the next one is read normally.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Protocol(e) if !matches!(e, ProtocolError::FrameTooLarge(_))
        )
    }

    /// Whether an inbound frame went over a size limit.
    #[must_use]
    pub fn is_oversized(&self) -> bool {
        matches!(
            self,
            TransportError::MessageTooLarge { .. }
                | TransportError::Protocol(ProtocolError::FrameTooLarge(_))
        )
    }
}

/// An active connection to a single client.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next event from the client.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be cancel
    /// safe: the server polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError>;

    /// Send an event to the client.
    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError>;

    /// Send a transport-level keepalive probe.
    async fn ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// When anything (including keepalive replies) last arrived.
    fn last_seen(&self) -> Instant;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        let bad_json = serde_json::from_str::<ClientEvent>("{").unwrap_err();
        assert!(TransportError::Protocol(ProtocolError::Json(bad_json)).is_recoverable());
        assert!(!TransportError::Protocol(ProtocolError::FrameTooLarge(1)).is_recoverable());
        assert!(!TransportError::ConnectionClosed.is_recoverable());
        assert!(!TransportError::MessageTooLarge { size: 2, max: 1 }.is_recoverable());
    }

    #[test]
    fn test_oversized_errors() {
        assert!(TransportError::MessageTooLarge { size: 2, max: 1 }.is_oversized());
        assert!(TransportError::Protocol(ProtocolError::FrameTooLarge(1)).is_oversized());
        assert!(!TransportError::ConnectionClosed.is_oversized());
        assert!(!TransportError::ReceiveFailed("reset".into()).is_oversized());
    }
}
