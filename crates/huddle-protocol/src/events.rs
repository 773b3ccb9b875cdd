//! Event envelopes for the Huddle protocol.
//!
//! Every frame on the wire is an envelope `{"event": <name>, "data": <payload>}`.
//! Event names match what browser clients already emit, so the relay can sit
//! behind an unmodified web client.

use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Error codes carried by [`ServerEvent::Error`].
pub mod codes {
    /// The frame could not be decoded as a known event.
    pub const INVALID_EVENT: u16 = 1001;
    /// The frame exceeded the configured size limit. The connection is
    /// closed after this error.
    pub const FRAME_TOO_LARGE: u16 = 1002;
}

/// The three negotiation stages a signaling payload can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    /// All kinds, in negotiation order.
    pub const ALL: [SignalKind; 3] = [SignalKind::Offer, SignalKind::Answer, SignalKind::Candidate];

    /// The wire event name used for this kind, in both directions.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            SignalKind::Offer => "audio-offer",
            SignalKind::Answer => "audio-answer",
            SignalKind::Candidate => "ice-candidate",
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An offer, answer or candidate addressed to a participant.
///
/// The payload is kept as the exact JSON structure the client sent. Only the
/// `from` and `to` fields are ever read; the negotiation body (`sdp` or
/// `candidate`) and any extra fields pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(Value);

impl SignalPayload {
    /// Build a payload `{from, to, <body_field>: body}`.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        body_field: &str,
        body: Value,
    ) -> Self {
        let mut map = Map::new();
        map.insert("from".to_string(), Value::String(from.into()));
        map.insert("to".to_string(), Value::String(to.into()));
        map.insert(body_field.to_string(), body);
        Self(Value::Object(map))
    }

    /// Build an offer payload carrying a session description.
    #[must_use]
    pub fn offer(from: impl Into<String>, to: impl Into<String>, sdp: Value) -> Self {
        Self::new(from, to, "sdp", sdp)
    }

    /// Build an answer payload carrying a session description.
    #[must_use]
    pub fn answer(from: impl Into<String>, to: impl Into<String>, sdp: Value) -> Self {
        Self::new(from, to, "sdp", sdp)
    }

    /// Build a candidate payload.
    #[must_use]
    pub fn candidate(from: impl Into<String>, to: impl Into<String>, candidate: Value) -> Self {
        Self::new(from, to, "candidate", candidate)
    }

    /// The identity that sent this payload, if present.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.0.get("from").and_then(Value::as_str)
    }

    /// The identity this payload is addressed to, if present.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.0.get("to").and_then(Value::as_str)
    }

    /// Get the raw payload.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

}

impl From<Value> for SignalPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A chat text or image post.
///
/// Posts are opaque JSON objects; the server only adds a `time` field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatPost(Map<String, Value>);

impl ChatPost {
    /// Create a post from its fields.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Set the server-side `time` stamp, replacing any client value.
    #[must_use]
    pub fn stamped(mut self, time: impl Into<String>) -> Self {
        self.0.insert("time".to_string(), Value::String(time.into()));
        self
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Become reachable for calls under the given identity.
    #[serde(rename = "join-audio")]
    JoinAudio(String),

    /// Stop being reachable for calls.
    #[serde(rename = "leave-audio")]
    LeaveAudio,

    #[serde(rename = "audio-offer")]
    AudioOffer(SignalPayload),

    #[serde(rename = "audio-answer")]
    AudioAnswer(SignalPayload),

    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalPayload),

    #[serde(rename = "chat message")]
    ChatMessage(ChatPost),

    #[serde(rename = "chat image")]
    ChatImage(ChatPost),

    /// Ask every client to clear its chat window.
    #[serde(rename = "clear-messages")]
    ClearMessages,
}

impl ClientEvent {
    /// Get the wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinAudio(_) => "join-audio",
            ClientEvent::LeaveAudio => "leave-audio",
            ClientEvent::AudioOffer(_) => SignalKind::Offer.event_name(),
            ClientEvent::AudioAnswer(_) => SignalKind::Answer.event_name(),
            ClientEvent::IceCandidate(_) => SignalKind::Candidate.event_name(),
            ClientEvent::ChatMessage(_) => "chat message",
            ClientEvent::ChatImage(_) => "chat image",
            ClientEvent::ClearMessages => "clear-messages",
        }
    }

    /// Create a signaling event of the given kind.
    #[must_use]
    pub fn signal(kind: SignalKind, payload: SignalPayload) -> Self {
        match kind {
            SignalKind::Offer => ClientEvent::AudioOffer(payload),
            SignalKind::Answer => ClientEvent::AudioAnswer(payload),
            SignalKind::Candidate => ClientEvent::IceCandidate(payload),
        }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// First event on every connection.
    #[serde(rename = "connected")]
    Connected {
        /// Identifier the server assigned to this connection.
        connection_id: String,
        /// Server protocol version.
        version: Version,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Full list of present participants, in join order.
    #[serde(rename = "audio-users")]
    AudioUsers(Vec<String>),

    /// A participant joined.
    #[serde(rename = "new-audio-user")]
    NewAudioUser(String),

    /// A participant left or disconnected.
    #[serde(rename = "audio-left")]
    AudioLeft(String),

    #[serde(rename = "audio-offer")]
    AudioOffer(SignalPayload),

    #[serde(rename = "audio-answer")]
    AudioAnswer(SignalPayload),

    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalPayload),

    #[serde(rename = "chat message")]
    ChatMessage(ChatPost),

    #[serde(rename = "chat image")]
    ChatImage(ChatPost),

    #[serde(rename = "chat-cleared")]
    ChatCleared,

    /// A frame from this client was rejected.
    #[serde(rename = "error")]
    Error {
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl ServerEvent {
    /// Get the wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::AudioUsers(_) => "audio-users",
            ServerEvent::NewAudioUser(_) => "new-audio-user",
            ServerEvent::AudioLeft(_) => "audio-left",
            ServerEvent::AudioOffer(_) => SignalKind::Offer.event_name(),
            ServerEvent::AudioAnswer(_) => SignalKind::Answer.event_name(),
            ServerEvent::IceCandidate(_) => SignalKind::Candidate.event_name(),
            ServerEvent::ChatMessage(_) => "chat message",
            ServerEvent::ChatImage(_) => "chat image",
            ServerEvent::ChatCleared => "chat-cleared",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Create a forwarded signaling event of the given kind.
    #[must_use]
    pub fn signal(kind: SignalKind, payload: SignalPayload) -> Self {
        match kind {
            SignalKind::Offer => ServerEvent::AudioOffer(payload),
            SignalKind::Answer => ServerEvent::AudioAnswer(payload),
            SignalKind::Candidate => ServerEvent::IceCandidate(payload),
        }
    }

    /// Create a `connected` event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: Version, heartbeat: u32) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_payload_addressing() {
        let payload = SignalPayload::offer("alice", "bob", json!({"type": "offer", "sdp": "v=0"}));
        assert_eq!(payload.sender(), Some("alice"));
        assert_eq!(payload.target(), Some("bob"));

        let malformed = SignalPayload::from(json!({"from": "alice", "to": 7}));
        assert_eq!(malformed.target(), None);

        let not_object = SignalPayload::from(json!("bob"));
        assert_eq!(not_object.sender(), None);
        assert_eq!(not_object.target(), None);
    }

    #[test]
    fn test_client_event_wire_shape() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"join-audio","data":"alice"}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinAudio("alice".to_string()));

        let event: ClientEvent = serde_json::from_str(r#"{"event":"leave-audio"}"#).unwrap();
        assert_eq!(event, ClientEvent::LeaveAudio);

        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"ice-candidate","data":{"from":"a","to":"b","candidate":{"sdpMid":"0"},"extra":[1,2]}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::IceCandidate(p) => {
                assert_eq!(p.target(), Some("b"));
                assert_eq!(p.as_value()["extra"], json!([1, 2]));
            }
            other => panic!("Expected ice-candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"event":"subscribe","data":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_wire_shape() {
        let users = ServerEvent::AudioUsers(vec!["alice".into(), "bob".into()]);
        assert_eq!(
            serde_json::to_value(&users).unwrap(),
            json!({"event": "audio-users", "data": ["alice", "bob"]})
        );

        let connected = ServerEvent::connected("conn_1", Version::new(1, 0), 30_000);
        assert_eq!(
            serde_json::to_value(&connected).unwrap(),
            json!({
                "event": "connected",
                "data": {"connection_id": "conn_1", "version": "1.0", "heartbeat": 30000}
            })
        );
    }

    #[test]
    fn test_signal_constructors_match_names() {
        for kind in SignalKind::ALL {
            let payload = SignalPayload::candidate("a", "b", json!(null));
            assert_eq!(ClientEvent::signal(kind, payload.clone()).name(), kind.event_name());
            assert_eq!(ServerEvent::signal(kind, payload).name(), kind.event_name());
        }
    }

    #[test]
    fn test_chat_post_stamp() {
        let post: ChatPost =
            serde_json::from_value(json!({"user": "alice", "text": "hi", "time": "x"})).unwrap();
        let post = post.stamped("12:00:00");
        assert_eq!(post.get("time"), Some(&json!("12:00:00")));
        assert_eq!(post.get("text"), Some(&json!("hi")));
    }
}
