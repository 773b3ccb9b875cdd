//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle signaling relay.
//!
//! This crate defines the events exchanged between browser clients and the
//! relay, the opaque signaling payload type, and the codecs used to put
//! events on the wire.
//!
//! ## Events
//!
//! - `join-audio` / `leave-audio` - Presence
//! - `audio-offer` / `audio-answer` / `ice-candidate` - Signaling, relayed verbatim
//! - `audio-users` / `new-audio-user` / `audio-left` - Presence broadcasts
//! - `chat message` / `chat image` / `clear-messages` - Chat fan-out
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ClientEvent, SignalPayload};
//! use serde_json::json;
//!
//! let offer = ClientEvent::AudioOffer(SignalPayload::offer(
//!     "alice",
//!     "bob",
//!     json!({"type": "offer", "sdp": "v=0"}),
//! ));
//!
//! let text = codec::encode_text(&offer).unwrap();
//! let decoded: ClientEvent = codec::decode_text(&text).unwrap();
//! assert_eq!(offer, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::ProtocolError;
pub use events::{codes, ChatPost, ClientEvent, ServerEvent, SignalKind, SignalPayload};
pub use version::{Version, PROTOCOL_VERSION};
