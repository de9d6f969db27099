// Hybrid persistence: durable PostgreSQL behind a health-checked adapter,
// a local always-available SQLite fallback, and a pending-operation queue
// replayed in order when the durable store recovers.
//
// Callers never see which backend served them. Durable-store failures
// surface only through `status()`, never as errors from reads or writes.

pub mod durable;
pub mod local;

use std::collections::VecDeque;

use anyhow::Result;
use bellhop_common::types::PushSubscription;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::metrics;

pub use durable::{create_pg_pool, run_migrations, DurableStore, MemoryDurable, PoolConfig};
pub use local::LocalStore;

/// HTTP statuses from the push collaborator that mean the endpoint is
/// permanently gone.
const ENDPOINT_GONE_STATUSES: [u16; 2] = [404, 410];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    Degraded,
}

/// Read-only view handed to the HTTP boundary for its own responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub healthy: bool,
    pub queue_depth: usize,
}

/// A write pending replay against the durable store.
#[derive(Debug, Clone)]
pub enum SyncOp {
    Upsert(PushSubscription),
    Delete { user_id: String },
}

#[derive(Debug, Clone)]
struct QueuedOp {
    op: SyncOp,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SyncState {
    health: StoreHealth,
    queue: VecDeque<QueuedOp>,
}

pub struct HybridStore {
    durable: DurableStore,
    local: LocalStore,
    // Writers and the replay pass serialize through this lock; the
    // durable pool's own concurrency control is never relied upon.
    state: Mutex<SyncState>,
}

impl HybridStore {
    pub fn new(durable: DurableStore, local: LocalStore) -> Self {
        Self {
            durable,
            local,
            state: Mutex::new(SyncState { health: StoreHealth::Healthy, queue: VecDeque::new() }),
        }
    }

    /// Initial health probe, run once before first use.
    pub async fn init(&self) {
        if let Err(error) = self.durable.probe().await {
            warn!(error = ?error, "durable store unreachable at startup, starting degraded");
            let mut state = self.state.lock().await;
            state.health = StoreHealth::Degraded;
            metrics::increment_store_degraded_transitions();
        }
    }

    /// Direct access to the local fallback store (offline backlog, tests).
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Persist one live push registration for a user, superseding any
    /// prior endpoint.
    pub async fn upsert_subscription(&self, subscription: PushSubscription) -> Result<()> {
        // Local first: the write is never lost even if the process dies
        // right after this line.
        self.local.upsert_subscription(&subscription)?;
        self.write_durable(SyncOp::Upsert(subscription)).await;
        Ok(())
    }

    pub async fn remove_subscription(&self, user_id: &str) -> Result<()> {
        self.local.delete_subscription(user_id)?;
        self.write_durable(SyncOp::Delete { user_id: user_id.to_string() }).await;
        Ok(())
    }

    /// Push-collaborator feedback: drop the registration when the
    /// endpoint is permanently gone. Returns whether a removal happened.
    pub async fn on_delivery_failure(&self, user_id: &str, status_code: u16) -> Result<bool> {
        if !ENDPOINT_GONE_STATUSES.contains(&status_code) {
            return Ok(false);
        }
        info!(user_id, status_code, "push endpoint gone, removing subscription");
        self.remove_subscription(user_id).await?;
        Ok(true)
    }

    async fn write_durable(&self, op: SyncOp) {
        let mut state = self.state.lock().await;
        match state.health {
            StoreHealth::Healthy => {
                if let Err(error) = apply_op(&self.durable, &op).await {
                    warn!(error = ?error, "durable write failed, degrading and queueing");
                    state.health = StoreHealth::Degraded;
                    metrics::increment_store_degraded_transitions();
                    state.queue.push_back(QueuedOp { op, enqueued_at: Utc::now() });
                }
            }
            StoreHealth::Degraded => {
                state.queue.push_back(QueuedOp { op, enqueued_at: Utc::now() });
            }
        }
        metrics::set_sync_queue_depth(state.queue.len() as i64);
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub async fn subscription(&self, user_id: &str) -> Result<Option<PushSubscription>> {
        if self.health().await == StoreHealth::Healthy {
            match self.durable.subscription(user_id).await {
                Ok(found) => return Ok(found),
                Err(error) => {
                    warn!(error = ?error, "durable read failed, falling back to local store");
                    self.mark_degraded().await;
                }
            }
        }
        self.local.subscription(user_id)
    }

    pub async fn all_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        if self.health().await == StoreHealth::Healthy {
            match self.durable.all_subscriptions().await {
                Ok(found) => return Ok(found),
                Err(error) => {
                    warn!(error = ?error, "durable scan failed, falling back to local store");
                    self.mark_degraded().await;
                }
            }
        }
        self.local.all_subscriptions()
    }

    // ── Offline message backlog (local-only) ────────────────────────

    pub fn push_offline(&self, user_id: &str, payload: &serde_json::Value) -> Result<()> {
        self.local.push_offline(user_id, payload)
    }

    pub fn drain_offline(&self, user_id: &str) -> Result<Vec<serde_json::Value>> {
        self.local.drain_offline(user_id)
    }

    pub fn prune_offline(&self, horizon: Duration) -> Result<usize> {
        self.local.prune_offline(horizon)
    }

    // ── Health ──────────────────────────────────────────────────────

    pub async fn health(&self) -> StoreHealth {
        self.state.lock().await.health
    }

    pub async fn status(&self) -> StoreStatus {
        let state = self.state.lock().await;
        StoreStatus {
            healthy: state.health == StoreHealth::Healthy,
            queue_depth: state.queue.len(),
        }
    }

    async fn mark_degraded(&self) {
        let mut state = self.state.lock().await;
        if state.health == StoreHealth::Healthy {
            state.health = StoreHealth::Degraded;
            metrics::increment_store_degraded_transitions();
        }
    }

    /// Periodic reachability probe. A degraded-to-healthy transition
    /// replays the pending queue strictly in enqueue order; one pass per
    /// recovery, failed entries are logged and discarded.
    pub async fn check_health(&self) -> StoreHealth {
        let probe = self.durable.probe().await;
        let mut state = self.state.lock().await;

        match (&probe, state.health) {
            (Ok(()), StoreHealth::Degraded) => {
                info!(queued = state.queue.len(), "durable store recovered, replaying sync queue");
                state.health = StoreHealth::Healthy;
                while let Some(entry) = state.queue.pop_front() {
                    if let Err(error) = apply_op(&self.durable, &entry.op).await {
                        warn!(
                            error = ?error,
                            enqueued_at = %entry.enqueued_at,
                            "sync queue replay failed, dropping entry"
                        );
                        metrics::increment_sync_replay_dropped();
                    }
                }
            }
            (Err(error), StoreHealth::Healthy) => {
                warn!(error = ?error, "durable store probe failed, degrading");
                state.health = StoreHealth::Degraded;
                metrics::increment_store_degraded_transitions();
            }
            _ => {}
        }

        metrics::set_sync_queue_depth(state.queue.len() as i64);
        state.health
    }
}

async fn apply_op(durable: &DurableStore, op: &SyncOp) -> Result<()> {
    match op {
        SyncOp::Upsert(subscription) => durable.upsert_subscription(subscription).await,
        SyncOp::Delete { user_id } => durable.delete_subscription(user_id).await,
    }
}
