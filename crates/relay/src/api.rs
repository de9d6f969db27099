// In-process boundary surface consumed by the HTTP collaborator and the
// push-delivery collaborator. The relay never speaks HTTP for these
// operations; callers hold an `App` handle and invoke them directly.

use std::sync::Arc;

use anyhow::Result;
use bellhop_common::types::{EventEnvelope, EventKind, PushSubscription, Target};
use serde::Serialize;
use serde_json::json;

use crate::dispatch::Dispatcher;
use crate::registry::ScopeRegistry;
use crate::signaling::SignalingRelay;
use crate::store::{HybridStore, StoreStatus};

/// The composition root's handle to every relay component. Cloning is
/// cheap; all components share state through their own handles.
#[derive(Clone)]
pub struct App {
    pub registry: ScopeRegistry,
    pub dispatcher: Dispatcher,
    pub signaling: SignalingRelay,
    pub store: Arc<HybridStore>,
}

/// Read-only introspection for the HTTP boundary.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub connection_count: usize,
    pub scopes: Vec<String>,
}

impl App {
    pub fn new(
        registry: ScopeRegistry,
        dispatcher: Dispatcher,
        signaling: SignalingRelay,
        store: Arc<HybridStore>,
    ) -> Self {
        Self { registry, dispatcher, signaling, store }
    }

    /// Deliver a user-facing notification. `kind` is the notification
    /// category carried opaquely to clients (e.g. `info`, `order_ready`).
    /// Returns the delivered count; zero means nobody was listening.
    pub async fn dispatch_notification(&self, target: Target, message: &str, kind: &str) -> usize {
        let envelope = EventEnvelope::new(
            EventKind::Notification,
            target,
            json!({ "message": message, "kind": kind }),
        );
        self.dispatcher.deliver(envelope).await
    }

    /// Deliver a content event (refresh, update, cache invalidation).
    pub async fn dispatch_content_event(
        &self,
        kind: EventKind,
        target: Target,
        payload: serde_json::Value,
    ) -> usize {
        let envelope = EventEnvelope::new(kind, target, payload);
        self.dispatcher.deliver(envelope).await
    }

    pub async fn stats(&self) -> Stats {
        Stats {
            connection_count: self.registry.connection_count().await,
            scopes: self.registry.scope_names().await,
        }
    }

    pub async fn store_status(&self) -> StoreStatus {
        self.store.status().await
    }

    // ── Push-delivery collaborator surface ──────────────────────────

    pub async fn add_subscription(
        &self,
        user_id: &str,
        endpoint: serde_json::Value,
    ) -> Result<()> {
        self.store.upsert_subscription(PushSubscription::new(user_id, endpoint)).await
    }

    pub async fn subscription(&self, user_id: &str) -> Result<Option<PushSubscription>> {
        self.store.subscription(user_id).await
    }

    pub async fn all_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        self.store.all_subscriptions().await
    }

    pub async fn on_delivery_failure(&self, user_id: &str, status_code: u16) -> Result<bool> {
        self.store.on_delivery_failure(user_id, status_code).await
    }

    /// Queue a payload for a user with no live connection. The backlog is
    /// bounded by the offline retention horizon, not replayed automatically.
    pub fn queue_offline(&self, user_id: &str, payload: &serde_json::Value) -> Result<()> {
        self.store.push_offline(user_id, payload)
    }

    /// Hand the caller a user's queued backlog, emptying it.
    pub fn drain_offline(&self, user_id: &str) -> Result<Vec<serde_json::Value>> {
        self.store.drain_offline(user_id)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::dedup::DedupCache;
    use crate::store::{DurableStore, LocalStore, MemoryDurable};

    /// An app wired against in-memory backends, plus the durable handle
    /// for outage injection.
    pub async fn memory_app() -> (App, MemoryDurable) {
        let durable = DurableStore::memory();
        let DurableStore::Memory(memory) = durable.clone() else { unreachable!() };
        let local = LocalStore::open_in_memory().expect("local store should open");
        let store = Arc::new(HybridStore::new(durable, local));
        store.init().await;

        let registry = ScopeRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone(), DedupCache::new());
        let signaling = SignalingRelay::new(registry.clone());
        (App::new(registry, dispatcher, signaling, store), memory)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::memory_app;
    use super::*;
    use bellhop_common::protocol::ws::WsMessage;
    use bellhop_common::types::Scope;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn connect(app: &App) -> (Uuid, mpsc::UnboundedReceiver<WsMessage>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        app.registry.register(id, sender).await;
        (id, receiver)
    }

    // Scenario: one connection in user:42; the first notification reaches
    // it, an identical retry within the window reaches nobody.
    #[tokio::test]
    async fn notification_delivers_once_then_dedups() {
        let (app, _memory) = memory_app().await;
        let (conn, mut rx) = connect(&app).await;
        app.registry.join(conn, Scope::user("42")).await;

        let delivered = app
            .dispatch_notification(Target::scope(Scope::user("42")), "hi", "info")
            .await;
        assert_eq!(delivered, 1);
        let WsMessage::Event { envelope } = rx.try_recv().expect("event should arrive") else {
            panic!("expected an event frame");
        };
        assert_eq!(envelope.kind, EventKind::Notification);
        assert_eq!(envelope.payload["message"], "hi");

        // Identical retry: same fingerprint, rejected by the dedup cache.
        let retried = app.dispatcher.deliver(envelope).await;
        assert_eq!(retried, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notification_to_empty_scope_is_success_with_zero_count() {
        let (app, _memory) = memory_app().await;

        let delivered = app
            .dispatch_notification(Target::scope(Scope::user("nobody")), "hello?", "info")
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn content_event_reaches_org_members() {
        let (app, _memory) = memory_app().await;
        let (a, mut rx_a) = connect(&app).await;
        let (b, mut rx_b) = connect(&app).await;
        app.registry.join(a, Scope::org("7")).await;
        app.registry.join(b, Scope::org("7")).await;

        let delivered = app
            .dispatch_content_event(
                EventKind::CacheInvalidate,
                Target::scope(Scope::org("7")),
                serde_json::json!({"keys": ["menu"]}),
            )
            .await;

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn stats_reports_connections_and_scopes() {
        let (app, _memory) = memory_app().await;
        let (conn, _rx) = connect(&app).await;
        app.registry.join(conn, Scope::user("42")).await;
        app.registry.join(conn, Scope::org("7")).await;

        let stats = app.stats().await;
        assert_eq!(stats.connection_count, 1);
        assert_eq!(stats.scopes, vec!["org:7".to_string(), "user:42".to_string()]);
    }

    #[tokio::test]
    async fn store_status_reflects_outages() {
        let (app, memory) = memory_app().await;
        assert!(app.store_status().await.healthy);

        memory.set_reachable(false);
        app.add_subscription("u1", serde_json::json!({"url": "x"})).await.expect("write");
        let status = app.store_status().await;
        assert!(!status.healthy);
        assert_eq!(status.queue_depth, 1);
    }

    #[tokio::test]
    async fn subscription_lifecycle_via_boundary_calls() {
        let (app, _memory) = memory_app().await;

        app.add_subscription("u1", serde_json::json!({"url": "a"})).await.expect("add");
        // A second registration supersedes the first.
        app.add_subscription("u1", serde_json::json!({"url": "b"})).await.expect("re-add");

        let record = app.subscription("u1").await.expect("read").expect("record exists");
        assert_eq!(record.endpoint["url"], "b");
        assert_eq!(app.all_subscriptions().await.expect("scan").len(), 1);

        assert!(app.on_delivery_failure("u1", 404).await.expect("handled"));
        assert!(app.subscription("u1").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn offline_backlog_queues_until_drained() {
        let (app, _memory) = memory_app().await;

        // Nobody in user:42 — the boundary decides to queue for later.
        let delivered = app
            .dispatch_notification(Target::scope(Scope::user("42")), "order ready", "info")
            .await;
        assert_eq!(delivered, 0);
        app.queue_offline("42", &serde_json::json!({"message": "order ready"}))
            .expect("queue");

        let backlog = app.drain_offline("42").expect("drain");
        assert_eq!(backlog.len(), 1);
        assert!(app.drain_offline("42").expect("second drain").is_empty());
    }
}
