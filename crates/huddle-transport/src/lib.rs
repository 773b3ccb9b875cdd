//! # huddle-transport
//!
//! Transport abstraction layer for the Huddle signaling relay.
//!
//! This crate provides a unified interface for the ways a client can reach
//! the relay:
//!
//! - **WebSocket** - Browsers, over an axum upgrade
//! - **Memory** - In-process pairs for embedding and tests
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Connection` trait, allowing the server to
//! be protocol-agnostic.
//!
//! ```rust,ignore
//! use huddle_transport::Connection;
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Ok(Some(event)) = conn.recv().await {
//!         // Process event
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{Connection, TransportError, WireFormat};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
