// Local always-available fallback store (SQLite).
//
// Every confirmed write lands here first, so its content is a
// superset-or-equal view of confirmed writes even when the durable store
// is unreachable. Also holds the bounded offline-message backlog, which
// is a purely local concern and never replicated.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use bellhop_common::types::PushSubscription;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE push_subscriptions (
    user_id     TEXT PRIMARY KEY,
    endpoint    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE offline_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    payload     TEXT NOT NULL,
    stored_at   TEXT NOT NULL
);

CREATE INDEX offline_messages_user_idx
    ON offline_messages (user_id);

CREATE INDEX offline_messages_stored_idx
    ON offline_messages (stored_at);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

#[derive(Debug)]
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create local store parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open local store at `{}`", path.display()))?;
        Self::initialize(conn)
    }

    /// In-memory store for tests and for running without any disk state.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory local store")?;
        Self::initialize(conn)
    }

    fn initialize(mut conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas for local store")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("local store lock poisoned"))
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock()?;
        current_schema_version(&conn)
    }

    // ── Push subscriptions ──────────────────────────────────────────

    /// Insert or replace the one live record for a user.
    pub fn upsert_subscription(&self, subscription: &PushSubscription) -> Result<()> {
        let endpoint = serde_json::to_string(&subscription.endpoint)
            .context("failed to serialize push endpoint")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO push_subscriptions (user_id, endpoint, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET
                 endpoint = excluded.endpoint,
                 created_at = excluded.created_at",
            params![
                subscription.user_id,
                endpoint,
                subscription.created_at.to_rfc3339(),
            ],
        )
        .context("failed to upsert push subscription locally")?;
        Ok(())
    }

    pub fn delete_subscription(&self, user_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM push_subscriptions WHERE user_id = ?1", params![user_id])
            .context("failed to delete push subscription locally")?;
        Ok(())
    }

    pub fn subscription(&self, user_id: &str) -> Result<Option<PushSubscription>> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(
                "SELECT user_id, endpoint, created_at
                 FROM push_subscriptions WHERE user_id = ?1",
            )
            .context("failed to prepare subscription lookup")?;
        let mut rows = statement
            .query_map(params![user_id], row_to_subscription)
            .context("failed to query push subscription")?;

        match rows.next() {
            Some(row) => Ok(Some(row.context("failed to decode push subscription row")??)),
            None => Ok(None),
        }
    }

    pub fn all_subscriptions(&self) -> Result<Vec<PushSubscription>> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(
                "SELECT user_id, endpoint, created_at
                 FROM push_subscriptions ORDER BY user_id",
            )
            .context("failed to prepare subscription scan")?;
        let rows = statement
            .query_map([], row_to_subscription)
            .context("failed to scan push subscriptions")?;

        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row.context("failed to decode push subscription row")??);
        }
        Ok(subscriptions)
    }

    // ── Offline message backlog ─────────────────────────────────────

    pub fn push_offline(&self, user_id: &str, payload: &serde_json::Value) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO offline_messages (user_id, payload, stored_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, payload.to_string(), Utc::now().to_rfc3339()],
        )
        .context("failed to store offline message")?;
        Ok(())
    }

    /// Return and delete the backlog for one user, oldest first.
    pub fn drain_offline(&self, user_id: &str) -> Result<Vec<serde_json::Value>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("failed to start offline drain transaction")?;

        let payloads = {
            let mut statement = tx
                .prepare(
                    "SELECT payload FROM offline_messages
                     WHERE user_id = ?1 ORDER BY id",
                )
                .context("failed to prepare offline drain")?;
            let rows = statement
                .query_map(params![user_id], |row| row.get::<_, String>(0))
                .context("failed to read offline backlog")?;

            let mut payloads = Vec::new();
            for raw in rows {
                let raw = raw.context("failed to decode offline message row")?;
                payloads.push(
                    serde_json::from_str(&raw).context("stored offline message is not valid JSON")?,
                );
            }
            payloads
        };

        tx.execute("DELETE FROM offline_messages WHERE user_id = ?1", params![user_id])
            .context("failed to clear drained offline backlog")?;
        tx.commit().context("failed to commit offline drain")?;

        Ok(payloads)
    }

    /// Delete backlog entries older than the retention horizon. Returns
    /// the number pruned.
    pub fn prune_offline(&self, horizon: Duration) -> Result<usize> {
        let cutoff: DateTime<Utc> = Utc::now() - horizon;
        let conn = self.lock()?;
        let pruned = conn
            .execute(
                "DELETE FROM offline_messages WHERE stored_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .context("failed to prune offline backlog")?;
        Ok(pruned)
    }
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<PushSubscription>> {
    let user_id: String = row.get(0)?;
    let endpoint: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    Ok(decode_subscription(user_id, &endpoint, &created_at))
}

fn decode_subscription(user_id: String, endpoint: &str, created_at: &str) -> Result<PushSubscription> {
    Ok(PushSubscription {
        user_id,
        endpoint: serde_json::from_str(endpoint).context("stored endpoint is not valid JSON")?,
        created_at: DateTime::parse_from_rfc3339(created_at)
            .context("stored created_at is not RFC 3339")?
            .with_timezone(&Utc),
    })
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply local store migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}
