// Durable backing store (PostgreSQL) behind a health-probed adapter.
//
// The in-memory backend mirrors the same contract for development and
// tests, with a reachability switch so unreachability can be forced.

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bellhop_common::types::PushSubscription;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::RwLock;

const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let min_connections = env::var("BELLHOP_DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MIN_CONNECTIONS);

        let max_connections = env::var("BELLHOP_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let acquire_timeout_secs = env::var("BELLHOP_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        Self {
            min_connections,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        }
    }
}

pub async fn create_pg_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let connect_options = database_url
        .parse::<PgConnectOptions>()
        .context("failed to parse durable store connection options")?;

    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .context("failed to connect to durable PostgreSQL store")
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS push_subscriptions (
            user_id     TEXT PRIMARY KEY,
            endpoint    JSONB NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("failed to ensure durable push_subscriptions table")?;

    Ok(())
}

/// The durable backend: PostgreSQL in production, in-memory for tests and
/// for running without a configured database.
#[derive(Clone)]
pub enum DurableStore {
    Postgres(PgPool),
    Memory(MemoryDurable),
}

impl DurableStore {
    pub fn memory() -> Self {
        Self::Memory(MemoryDurable::default())
    }

    /// Cheap reachability probe. Any error means unreachable.
    pub async fn probe(&self) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query_scalar::<_, i32>("SELECT 1")
                    .fetch_one(pool)
                    .await
                    .context("durable store health probe failed")?;
                Ok(())
            }
            Self::Memory(memory) => memory.ensure_reachable(),
        }
    }

    /// Insert or replace the record for a user. Keyed uniquely by user
    /// identifier, so replaying the same operation twice is harmless.
    pub async fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO push_subscriptions (user_id, endpoint, created_at)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (user_id) DO UPDATE SET
                         endpoint = EXCLUDED.endpoint,
                         created_at = EXCLUDED.created_at",
                )
                .bind(&subscription.user_id)
                .bind(&subscription.endpoint)
                .bind(subscription.created_at)
                .execute(pool)
                .await
                .context("failed to upsert push subscription durably")?;
                Ok(())
            }
            Self::Memory(memory) => {
                memory.ensure_reachable()?;
                memory
                    .records
                    .write()
                    .await
                    .insert(subscription.user_id.clone(), subscription.clone());
                Ok(())
            }
        }
    }

    pub async fn delete_subscription(&self, user_id: &str) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1")
                    .bind(user_id)
                    .execute(pool)
                    .await
                    .context("failed to delete push subscription durably")?;
                Ok(())
            }
            Self::Memory(memory) => {
                memory.ensure_reachable()?;
                memory.records.write().await.remove(user_id);
                Ok(())
            }
        }
    }

    pub async fn subscription(&self, user_id: &str) -> Result<Option<PushSubscription>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (String, serde_json::Value, DateTime<Utc>)>(
                    "SELECT user_id, endpoint, created_at
                     FROM push_subscriptions WHERE user_id = $1",
                )
                .bind(user_id)
                .fetch_optional(pool)
                .await
                .context("failed to read push subscription from durable store")?;

                Ok(row.map(|(user_id, endpoint, created_at)| PushSubscription {
                    user_id,
                    endpoint,
                    created_at,
                }))
            }
            Self::Memory(memory) => {
                memory.ensure_reachable()?;
                Ok(memory.records.read().await.get(user_id).cloned())
            }
        }
    }

    pub async fn all_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (String, serde_json::Value, DateTime<Utc>)>(
                    "SELECT user_id, endpoint, created_at
                     FROM push_subscriptions ORDER BY user_id",
                )
                .fetch_all(pool)
                .await
                .context("failed to scan push subscriptions from durable store")?;

                Ok(rows
                    .into_iter()
                    .map(|(user_id, endpoint, created_at)| PushSubscription {
                        user_id,
                        endpoint,
                        created_at,
                    })
                    .collect())
            }
            Self::Memory(memory) => {
                memory.ensure_reachable()?;
                let mut subscriptions: Vec<PushSubscription> =
                    memory.records.read().await.values().cloned().collect();
                subscriptions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                Ok(subscriptions)
            }
        }
    }
}

/// In-memory durable backend with a reachability switch.
#[derive(Clone, Default)]
pub struct MemoryDurable {
    records: Arc<RwLock<HashMap<String, PushSubscription>>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryDurable {
    /// Flip reachability; used to simulate an outage of the durable store.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("durable store is unreachable");
        }
        Ok(())
    }
}
