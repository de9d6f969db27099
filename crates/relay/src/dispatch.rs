// Dispatcher: resolve an envelope's audience and fan it out exactly once.

use bellhop_common::protocol::ws::WsMessage;
use bellhop_common::types::{EventEnvelope, Target};
use tracing::{debug, warn};

use crate::dedup::DedupCache;
use crate::metrics;
use crate::registry::ScopeRegistry;

/// Fans envelopes out to the connections resolved through the scope
/// registry, deduplicating retries via the dedup cache.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ScopeRegistry,
    dedup: DedupCache,
}

impl Dispatcher {
    pub fn new(registry: ScopeRegistry, dedup: DedupCache) -> Self {
        Self { registry, dedup }
    }

    /// Deliver an envelope once per resolved connection.
    ///
    /// Returns the number of connections the event was pushed to. Zero is
    /// a valid non-error result: nobody was listening. A duplicate
    /// fingerprint also resolves to zero; the caller cannot distinguish
    /// the two and is not meant to.
    pub async fn deliver(&self, envelope: EventEnvelope) -> usize {
        // Resolve membership first, then release the registry lock before
        // any channel send.
        let recipients = match &envelope.target {
            Target::Broadcast => self.registry.all_senders().await,
            Target::Scope { scope } => self.registry.senders_for(scope).await,
        };

        let fingerprint = DedupCache::fingerprint(
            &envelope.target,
            envelope.kind,
            &envelope.payload,
            envelope.emitted_at,
        );
        if !self.dedup.admit(&fingerprint).await {
            metrics::increment_dedup_rejections();
            debug!(
                event_id = %envelope.id,
                target = %envelope.target,
                "duplicate event rejected"
            );
            return 0;
        }

        let mut delivered = 0;
        for (connection_id, sender) in recipients {
            if sender.send(WsMessage::Event { envelope: envelope.clone() }).is_ok() {
                delivered += 1;
            } else {
                // Receiver gone: the socket task died without cleanup.
                // Treat it as an implicit disconnect.
                warn!(connection_id = %connection_id, "outbound channel closed, removing connection");
                self.registry.remove(connection_id).await;
            }
        }

        metrics::add_events_delivered(delivered as u64);
        debug!(
            event_id = %envelope.id,
            target = %envelope.target,
            kind = envelope.kind.as_str(),
            delivered,
            "event dispatched"
        );
        delivered
    }
}
