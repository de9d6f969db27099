// Stateless pass-through of peer-to-peer signaling messages.
//
// Signaling is latency-sensitive: when the target has no live connection
// the message is dropped on the floor. No queuing, no push fallback, no
// dedup — stale delivery is worse than no delivery, and the two peers own
// all session state themselves.

use bellhop_common::protocol::ws::WsMessage;
use bellhop_common::types::{EventEnvelope, EventKind, Scope, SignalKind, Target};
use serde_json::json;
use tracing::debug;

use crate::metrics;
use crate::registry::ScopeRegistry;

#[derive(Debug, Clone)]
pub struct SignalingRelay {
    registry: ScopeRegistry,
}

impl SignalingRelay {
    pub fn new(registry: ScopeRegistry) -> Self {
        Self { registry }
    }

    /// Forward a signaling payload verbatim to every live connection of
    /// the target user. Returns the delivered count; zero means the
    /// message was silently dropped.
    pub async fn relay(
        &self,
        target_user_id: &str,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> usize {
        let scope = Scope::user(target_user_id);
        let recipients = self.registry.senders_for(&scope).await;
        if recipients.is_empty() {
            metrics::increment_signals_dropped();
            debug!(target_user = target_user_id, kind = kind.as_str(), "signal dropped, target offline");
            return 0;
        }

        let envelope = EventEnvelope::new(
            EventKind::Signal,
            Target::scope(scope),
            json!({ "signal": kind, "data": payload }),
        );

        let mut delivered = 0;
        for (connection_id, sender) in recipients {
            if sender.send(WsMessage::Event { envelope: envelope.clone() }).is_ok() {
                delivered += 1;
            } else {
                self.registry.remove(connection_id).await;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn connect(registry: &ScopeRegistry) -> (Uuid, mpsc::UnboundedReceiver<WsMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        registry.register(id, sender).await;
        (id, receiver)
    }

    #[tokio::test]
    async fn relays_to_the_target_user_connection() {
        let registry = ScopeRegistry::new();
        let relay = SignalingRelay::new(registry.clone());

        let (conn, mut rx) = connect(&registry).await;
        registry.join(conn, Scope::user("u9")).await;

        let delivered = relay.relay("u9", SignalKind::Offer, json!({"sdp": "v=0"})).await;
        assert_eq!(delivered, 1);

        let WsMessage::Event { envelope } = rx.try_recv().expect("signal frame should arrive") else {
            panic!("expected an event frame");
        };
        assert_eq!(envelope.kind, EventKind::Signal);
        assert_eq!(envelope.payload["signal"], "offer");
        assert_eq!(envelope.payload["data"]["sdp"], "v=0");
    }

    // Scenario: relaying to a user with no live connection returns zero
    // and raises no error.
    #[tokio::test]
    async fn offline_target_drops_the_signal_silently() {
        let registry = ScopeRegistry::new();
        let relay = SignalingRelay::new(registry);

        let delivered = relay.relay("u9", SignalKind::IceCandidate, json!({"candidate": "..."})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn signals_are_not_deduplicated() {
        let registry = ScopeRegistry::new();
        let relay = SignalingRelay::new(registry.clone());

        let (conn, mut rx) = connect(&registry).await;
        registry.join(conn, Scope::user("u9")).await;

        let payload = json!({"candidate": "same"});
        assert_eq!(relay.relay("u9", SignalKind::IceCandidate, payload.clone()).await, 1);
        assert_eq!(relay.relay("u9", SignalKind::IceCandidate, payload).await, 1);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn call_bell_reaches_every_connection_of_the_user() {
        let registry = ScopeRegistry::new();
        let relay = SignalingRelay::new(registry.clone());

        // Same user signed in on two devices: two connections may hold the
        // same user scope.
        let (first, mut rx_first) = connect(&registry).await;
        let (second, mut rx_second) = connect(&registry).await;
        registry.join(first, Scope::user("w1")).await;
        registry.join(second, Scope::user("w1")).await;

        let delivered = relay.relay("w1", SignalKind::CallBell, json!({"table": 12})).await;
        assert_eq!(delivered, 2);
        assert!(rx_first.try_recv().is_ok());
        assert!(rx_second.try_recv().is_ok());
    }
}
