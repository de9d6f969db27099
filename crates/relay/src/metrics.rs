use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc, OnceLock,
};

pub struct RelayMetrics {
    events_delivered_total: AtomicU64,
    dedup_rejections_total: AtomicU64,
    active_connections: AtomicI64,
    store_degraded_transitions_total: AtomicU64,
    sync_replay_dropped_total: AtomicU64,
    sync_queue_depth: AtomicI64,
    signals_dropped_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        Self {
            events_delivered_total: AtomicU64::new(0),
            dedup_rejections_total: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            store_degraded_transitions_total: AtomicU64::new(0),
            sync_replay_dropped_total: AtomicU64::new(0),
            sync_queue_depth: AtomicI64::new(0),
            signals_dropped_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn add_events_delivered(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.events_delivered_total.fetch_add(count, Ordering::Relaxed);
    }
}

pub fn increment_dedup_rejections() {
    if let Some(metrics) = global_metrics() {
        metrics.dedup_rejections_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

pub fn increment_store_degraded_transitions() {
    if let Some(metrics) = global_metrics() {
        metrics.store_degraded_transitions_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn increment_sync_replay_dropped() {
    if let Some(metrics) = global_metrics() {
        metrics.sync_replay_dropped_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn set_sync_queue_depth(depth: i64) {
    if let Some(metrics) = global_metrics() {
        metrics.sync_queue_depth.store(depth, Ordering::Relaxed);
    }
}

pub fn increment_signals_dropped() {
    if let Some(metrics) = global_metrics() {
        metrics.signals_dropped_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl RelayMetrics {
    pub fn events_delivered_total(&self) -> u64 {
        self.events_delivered_total.load(Ordering::Relaxed)
    }

    pub fn dedup_rejections_total(&self) -> u64 {
        self.dedup_rejections_total.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn store_degraded_transitions_total(&self) -> u64 {
        self.store_degraded_transitions_total.load(Ordering::Relaxed)
    }

    pub fn sync_replay_dropped_total(&self) -> u64 {
        self.sync_replay_dropped_total.load(Ordering::Relaxed)
    }

    pub fn sync_queue_depth(&self) -> i64 {
        self.sync_queue_depth.load(Ordering::Relaxed)
    }

    pub fn signals_dropped_total(&self) -> u64 {
        self.signals_dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = RelayMetrics::default();
        metrics.events_delivered_total.fetch_add(3, Ordering::Relaxed);
        metrics.dedup_rejections_total.fetch_add(1, Ordering::Relaxed);
        assert_eq!(metrics.events_delivered_total(), 3);
        assert_eq!(metrics.dedup_rejections_total(), 1);
    }

    #[test]
    fn active_connections_can_go_up_and_down() {
        let metrics = RelayMetrics::default();
        metrics.active_connections.fetch_add(2, Ordering::Relaxed);
        metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn global_helpers_are_noops_before_installation() {
        // The global may or may not be installed by another test; either
        // way the helpers must not panic.
        add_events_delivered(1);
        increment_dedup_rejections();
        set_sync_queue_depth(5);
    }
}
