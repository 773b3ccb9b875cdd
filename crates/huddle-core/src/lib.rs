//! # huddle-core
//!
//! Presence tracking and signaling relay for Huddle.
//!
//! This crate provides the building blocks of the relay:
//!
//! - **Hub** - One outbound queue per live connection
//! - **Presence** - Which identity each connection is reachable under
//! - **Router** - Point-to-point relay of offers, answers and candidates
//! - **Relay** - Ties the three together and owns connection teardown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│     Hub     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │ resolve           ▲
//!        │                   ▼                   │ broadcast
//!        │            ┌─────────────┐            │
//!        └───────────▶│  Presence   │────────────┘
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod presence;
pub mod relay;
pub mod router;

pub use connection::ConnectionId;
pub use hub::{Hub, Outbox};
pub use presence::{PresenceEntry, PresenceRegistry};
pub use relay::{Relay, RelayStats};
pub use router::{DropReason, RouteOutcome, RouterStats, SignalingRouter};
