//! Signaling router for Huddle.
//!
//! The router relays offers, answers and candidates to whichever connection
//! is currently present under the payload's `to` identity. It keeps no
//! per-call state: ordering of the negotiation is left to the two peers.

use crate::connection::ConnectionId;
use crate::hub::Hub;
use crate::presence::PresenceRegistry;
use huddle_protocol::{ServerEvent, SignalKind, SignalPayload};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Why a payload was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The payload has no string `from` or `to` field.
    Unaddressed,
    /// No present participant has the target identity.
    TargetNotPresent,
    /// The target disconnected between lookup and delivery.
    TargetGone,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Unaddressed => "unaddressed",
            DropReason::TargetNotPresent => "target_not_present",
            DropReason::TargetGone => "target_gone",
        }
    }
}

/// Result of routing one payload.
///
/// This never reaches the sender; it exists for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to exactly this connection.
    Delivered(ConnectionId),
    /// Silently dropped.
    Dropped(DropReason),
}

impl RouteOutcome {
    /// Check if the payload was delivered.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, RouteOutcome::Delivered(_))
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Payloads forwarded to a connection.
    pub delivered: u64,
    /// Payloads dropped for any reason.
    pub dropped: u64,
}

/// Point-to-point relay of signaling payloads by identity lookup.
#[derive(Debug)]
pub struct SignalingRouter {
    presence: Arc<PresenceRegistry>,
    hub: Arc<Hub>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SignalingRouter {
    /// Create a router resolving targets through `presence` and delivering
    /// through `hub`.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>, hub: Arc<Hub>) -> Self {
        Self {
            presence,
            hub,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Relay a session offer.
    pub fn offer(&self, payload: SignalPayload) -> RouteOutcome {
        self.route(SignalKind::Offer, payload)
    }

    /// Relay a session answer.
    pub fn answer(&self, payload: SignalPayload) -> RouteOutcome {
        self.route(SignalKind::Answer, payload)
    }

    /// Relay a network candidate.
    pub fn candidate(&self, payload: SignalPayload) -> RouteOutcome {
        self.route(SignalKind::Candidate, payload)
    }

    /// Relay a payload of any kind to the connection present under its
    /// `to` identity.
    ///
    /// The payload is forwarded unchanged to at most one connection. When the
    /// target cannot be resolved the payload is dropped without telling the
    /// sender.
    pub fn route(&self, kind: SignalKind, payload: SignalPayload) -> RouteOutcome {
        let outcome = self.deliver(kind, payload);
        match &outcome {
            RouteOutcome::Delivered(target) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(kind = %kind, connection = %target, "Signal delivered");
            }
            RouteOutcome::Dropped(reason) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %kind, reason = reason.as_str(), "Signal dropped");
            }
        }
        outcome
    }

    fn deliver(&self, kind: SignalKind, payload: SignalPayload) -> RouteOutcome {
        if payload.sender().is_none() {
            return RouteOutcome::Dropped(DropReason::Unaddressed);
        }
        let Some(target) = payload.target() else {
            return RouteOutcome::Dropped(DropReason::Unaddressed);
        };
        let Some(connection_id) = self.presence.resolve(target) else {
            return RouteOutcome::Dropped(DropReason::TargetNotPresent);
        };

        if self
            .hub
            .send_to(&connection_id, ServerEvent::signal(kind, payload))
        {
            RouteOutcome::Delivered(connection_id)
        } else {
            RouteOutcome::Dropped(DropReason::TargetGone)
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Outbox;
    use serde_json::json;

    struct Fixture {
        hub: Arc<Hub>,
        presence: Arc<PresenceRegistry>,
        router: SignalingRouter,
    }

    fn fixture() -> Fixture {
        let hub = Arc::new(Hub::new());
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&hub)));
        let router = SignalingRouter::new(Arc::clone(&presence), Arc::clone(&hub));
        Fixture {
            hub,
            presence,
            router,
        }
    }

    fn join(f: &Fixture, conn: &str, identity: &str) -> (ConnectionId, Outbox) {
        let id = ConnectionId::new(conn);
        let rx = f.hub.connect(id.clone());
        f.presence.join(&id, identity);
        (id, rx)
    }

    fn clear(rx: &mut Outbox) {
        while rx.try_recv().is_ok() {}
    }

    #[test]
    fn test_route_to_present_target() {
        let f = fixture();
        let (_a, mut rx_a) = join(&f, "a", "alice");
        let (b, mut rx_b) = join(&f, "b", "bob");
        clear(&mut rx_a);
        clear(&mut rx_b);

        let payload = SignalPayload::offer("alice", "bob", json!({"type": "offer", "sdp": "v=0"}));
        let outcome = f.router.offer(payload.clone());

        assert_eq!(outcome, RouteOutcome::Delivered(b));
        assert_eq!(*rx_b.try_recv().unwrap(), ServerEvent::AudioOffer(payload));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_each_kind_keeps_its_event() {
        let f = fixture();
        let (_a, _rx_a) = join(&f, "a", "alice");
        let (_b, mut rx_b) = join(&f, "b", "bob");
        clear(&mut rx_b);

        let answer = SignalPayload::answer("alice", "bob", json!({"type": "answer"}));
        let candidate = SignalPayload::candidate(
            "alice",
            "bob",
            json!({"candidate": "c1", "sdpMLineIndex": 0}),
        );
        assert!(f.router.answer(answer.clone()).is_delivered());
        assert!(f.router.candidate(candidate.clone()).is_delivered());

        assert_eq!(*rx_b.try_recv().unwrap(), ServerEvent::AudioAnswer(answer));
        assert_eq!(*rx_b.try_recv().unwrap(), ServerEvent::IceCandidate(candidate));
    }

    #[test]
    fn test_route_to_absent_target_is_dropped() {
        let f = fixture();
        let (_a, mut rx_a) = join(&f, "a", "alice");
        let (_b, mut rx_b) = join(&f, "b", "bob");
        clear(&mut rx_a);
        clear(&mut rx_b);

        for kind in SignalKind::ALL {
            let outcome = f
                .router
                .route(kind, SignalPayload::offer("alice", "carol", json!({})));
            assert_eq!(outcome, RouteOutcome::Dropped(DropReason::TargetNotPresent));
        }

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(f.router.stats(), RouterStats { delivered: 0, dropped: 3 });
    }

    #[test]
    fn test_malformed_payload_is_dropped_for_every_kind() {
        let f = fixture();
        let (_b, mut rx_b) = join(&f, "b", "bob");
        clear(&mut rx_b);

        let malformed = [
            json!({"to": "bob", "sdp": {}}),
            json!({"from": "alice", "sdp": {}}),
            json!({"from": "alice", "to": ["bob"]}),
            json!("bob"),
        ];
        for kind in SignalKind::ALL {
            for value in &malformed {
                let outcome = f.router.route(kind, SignalPayload::from(value.clone()));
                assert_eq!(outcome, RouteOutcome::Dropped(DropReason::Unaddressed));
            }
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_route_after_target_left() {
        let f = fixture();
        let (_a, _rx_a) = join(&f, "a", "alice");
        let (b, _rx_b) = join(&f, "b", "bob");

        f.presence.leave(&b);
        let outcome = f
            .router
            .candidate(SignalPayload::candidate("alice", "bob", json!({})));
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::TargetNotPresent));
    }

    #[test]
    fn test_route_to_closed_queue() {
        let f = fixture();
        let (_a, _rx_a) = join(&f, "a", "alice");
        let (_b, rx_b) = join(&f, "b", "bob");
        drop(rx_b);

        let outcome = f.router.offer(SignalPayload::offer("alice", "bob", json!({})));
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::TargetGone));
    }

    #[test]
    fn test_duplicate_identity_delivers_once() {
        let f = fixture();
        let (_a, _rx_a) = join(&f, "a", "alice");
        let (_b1, mut rx_b1) = join(&f, "b1", "bob");
        let (b2, mut rx_b2) = join(&f, "b2", "bob");
        clear(&mut rx_b1);
        clear(&mut rx_b2);

        let outcome = f.router.offer(SignalPayload::offer("alice", "bob", json!({})));

        assert_eq!(outcome, RouteOutcome::Delivered(b2));
        assert!(rx_b2.try_recv().is_ok());
        assert!(rx_b1.try_recv().is_err());
    }
}
