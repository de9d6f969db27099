mod api;
mod config;
mod dedup;
mod dispatch;
mod error;
mod metrics;
mod registry;
mod signaling;
mod store;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::api::App;
use crate::config::RelayConfig;
use crate::dedup::DedupCache;
use crate::dispatch::Dispatcher;
use crate::metrics::RelayMetrics;
use crate::registry::ScopeRegistry;
use crate::signaling::SignalingRelay;
use crate::store::{create_pg_pool, run_migrations, DurableStore, HybridStore, LocalStore, PoolConfig};

/// How often the offline backlog is checked against its retention horizon.
const OFFLINE_PRUNE_INTERVAL_SECS: u64 = 3_600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    metrics::set_global_metrics(Arc::new(RelayMetrics::default()));

    let local = LocalStore::open(&config.local_db_path).with_context(|| {
        format!("failed to open local store at `{}`", config.local_db_path.display())
    })?;

    let durable = match &config.database_url {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, PoolConfig::from_env())
                .await
                .context("failed to initialize durable store pool")?;
            run_migrations(&pool).await.context("failed to migrate durable store")?;
            DurableStore::Postgres(pool)
        }
        None => {
            warn!("BELLHOP_DATABASE_URL not set, using in-memory durable backend");
            DurableStore::memory()
        }
    };

    let store = Arc::new(HybridStore::new(durable, local));
    store.init().await;

    let registry = ScopeRegistry::new();
    let dedup = DedupCache::new().with_retention(config.dedup_retention);
    let dispatcher = Dispatcher::new(registry.clone(), dedup.clone());
    let signaling = SignalingRelay::new(registry.clone());
    let app = App::new(registry, dispatcher, signaling, Arc::clone(&store));

    spawn_dedup_sweep(dedup, config.dedup_sweep_interval);
    spawn_health_probe(Arc::clone(&store), config.health_probe_interval);
    spawn_offline_prune(Arc::clone(&store), config.offline_retention_hours);

    let router = build_router(app);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn build_router(app: App) -> Router {
    Router::new().route("/healthz", get(healthz)).merge(ws::router(app))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

fn spawn_dedup_sweep(dedup: DedupCache, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip immediate first tick
        loop {
            ticker.tick().await;
            let evicted = dedup.evict_expired().await;
            if evicted > 0 {
                debug!(evicted, "dedup sweep completed");
            }
        }
    });
}

fn spawn_health_probe(store: Arc<HybridStore>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.check_health().await;
        }
    });
}

fn spawn_offline_prune(store: Arc<HybridStore>, retention_hours: i64) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(OFFLINE_PRUNE_INTERVAL_SECS));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.prune_offline(chrono::Duration::hours(retention_hours)) {
                Ok(pruned) if pruned > 0 => debug!(pruned, "offline backlog pruned"),
                Ok(_) => {}
                Err(error) => warn!(error = ?error, "offline backlog prune failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::build_router;
    use crate::api::test_support::memory_app;

    #[tokio::test]
    async fn health_check_responds_ok() {
        let (app, _memory) = memory_app().await;
        let response = build_router(app)
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (app, _memory) = memory_app().await;
        let response = build_router(app)
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
