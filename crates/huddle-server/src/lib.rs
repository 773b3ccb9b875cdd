//! # Huddle Server
//!
//! Chat relay with peer-to-peer call signaling.
//!
//! The binary wires these modules together; they are exposed as a library
//! so integration tests can run a server on an ephemeral port.

pub mod accounts;
pub mod config;
pub mod handlers;
pub mod metrics;
