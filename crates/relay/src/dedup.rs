// Short-lived idempotency ledger for event delivery.
//
// Keyed by a derived event fingerprint; an entry older than the retention
// window is treated as absent so legitimate re-sends after the window go
// through. A background sweep bounds the map to O(events per window).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bellhop_common::types::{EventKind, Target};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// Default retention window for admitted fingerprints.
const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Width of the coarse timestamp bucket folded into fingerprints, so
/// immediate retries collide while later legitimate sends do not.
const FINGERPRINT_BUCKET_SECS: i64 = 30;

/// Maximum payload prefix hashed into a fingerprint.
const FINGERPRINT_PAYLOAD_PREFIX: usize = 256;

/// In-memory dedup ledger. Cloning shares the underlying map.
#[derive(Debug, Clone)]
pub struct DedupCache {
    entries: Arc<RwLock<HashMap<String, Instant>>>,
    retention: Duration,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), retention: DEFAULT_RETENTION }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Record a fingerprint if it is new (or expired) and report whether
    /// the event should be delivered.
    ///
    /// Atomic with respect to concurrent callers: the check and the insert
    /// happen under one write lock, so two racing `admit` calls for the
    /// same fingerprint cannot both return true.
    pub async fn admit(&self, fingerprint: &str) -> bool {
        let mut guard = self.entries.write().await;
        match guard.get(fingerprint) {
            Some(admitted_at) if admitted_at.elapsed() < self.retention => false,
            _ => {
                guard.insert(fingerprint.to_string(), Instant::now());
                true
            }
        }
    }

    /// Remove entries older than the retention window. Called from a timer;
    /// eviction is lazy and never delays delivery.
    pub async fn evict_expired(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, admitted_at| admitted_at.elapsed() < self.retention);
        before - guard.len()
    }

    /// Number of recorded fingerprints (including not-yet-swept expired ones).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Derive the fingerprint for an event.
    ///
    /// Stable for logically-identical retries (same target, kind, payload,
    /// and coarse time bucket) and distinct for different payloads emitted
    /// in rapid succession.
    pub fn fingerprint(
        target: &Target,
        kind: EventKind,
        payload: &serde_json::Value,
        emitted_at: DateTime<Utc>,
    ) -> String {
        let serialized = payload.to_string();
        let prefix_len = serialized
            .char_indices()
            .nth(FINGERPRINT_PAYLOAD_PREFIX)
            .map(|(index, _)| index)
            .unwrap_or(serialized.len());
        let bucket = emitted_at.timestamp() / FINGERPRINT_BUCKET_SECS;

        let mut hasher = Sha256::new();
        hasher.update(target.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(serialized[..prefix_len].as_bytes());
        hasher.update([0]);
        hasher.update(bucket.to_be_bytes());
        format!("{:x}", hasher.finalize())
    }
}
