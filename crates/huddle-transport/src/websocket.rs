//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum WebSocket. Text messages carry JSON envelopes,
//! binary messages carry length-prefixed MessagePack; replies use whichever
//! format the client used last.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use huddle_protocol::{codec, ClientEvent, ServerEvent};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, warn};

use crate::traits::{Connection, TransportError, WireFormat};

/// A WebSocket connection.
pub struct WebSocketConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
    format: WireFormat,
    read_buffer: BytesMut,
    max_message_size: usize,
    last_seen: Instant,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, max_message_size: usize) -> Self {
        Self {
            socket,
            remote_addr: None,
            is_open: true,
            format: WireFormat::default(),
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
            last_seen: Instant::now(),
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                size, self.max_message_size
            );
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn decode_buffered(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        match codec::decode_from(&mut self.read_buffer) {
            Ok(event) => Ok(event),
            Err(e) => {
                // Resynchronize on the next message
                self.read_buffer.clear();
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        if let Some(event) = self.decode_buffered()? {
            return Ok(Some(event));
        }

        loop {
            let Some(message) = self.socket.recv().await else {
                debug!("WebSocket stream ended");
                self.is_open = false;
                return Ok(None);
            };
            self.last_seen = Instant::now();

            match message {
                Ok(Message::Text(text)) => {
                    self.format = WireFormat::Text;
                    self.check_size(text.len())?;
                    return Ok(Some(codec::decode_text(&text)?));
                }
                Ok(Message::Binary(data)) => {
                    self.format = WireFormat::Binary;
                    // A frame split across messages counts as a whole
                    if let Err(e) = self.check_size(self.read_buffer.len() + data.len()) {
                        self.read_buffer.clear();
                        return Err(e);
                    }
                    self.read_buffer.extend_from_slice(&data);
                    if let Some(event) = self.decode_buffered()? {
                        return Ok(Some(event));
                    }
                    // Need more data, continue reading
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // axum answers pings itself
                }
                Ok(Message::Close(_)) => {
                    debug!("Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Err(e) => {
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match self.format {
            WireFormat::Text => Message::Text(codec::encode_text(event)?),
            WireFormat::Binary => Message::Binary(codec::encode(event)?.to_vec()),
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }

    fn last_seen(&self) -> Instant {
        self.last_seen
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
