// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The durable pool additionally reads its own tuning vars.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string for the durable store. Absent means
    /// the relay runs against the in-memory durable backend.
    pub database_url: Option<String>,
    /// Path of the local fallback SQLite database.
    pub local_db_path: PathBuf,
    /// Log filter directive (e.g. `info`, `bellhop_relay=debug`).
    pub log_filter: String,
    /// How long an admitted event fingerprint suppresses duplicates.
    pub dedup_retention: Duration,
    /// Interval of the background dedup sweep.
    pub dedup_sweep_interval: Duration,
    /// Interval of the durable-store health probe.
    pub health_probe_interval: Duration,
    /// Hours an offline message stays queued before pruning.
    pub offline_retention_hours: i64,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `BELLHOP_HOST` | `0.0.0.0` |
    /// | `BELLHOP_PORT` | `8080` |
    /// | `BELLHOP_DATABASE_URL` | *(none — in-memory durable backend)* |
    /// | `BELLHOP_LOCAL_DB_PATH` | `bellhop-local.db` |
    /// | `BELLHOP_LOG_FILTER` | `info` |
    /// | `BELLHOP_DEDUP_RETENTION_SECS` | `300` |
    /// | `BELLHOP_DEDUP_SWEEP_SECS` | `60` |
    /// | `BELLHOP_HEALTH_PROBE_SECS` | `30` |
    /// | `BELLHOP_OFFLINE_RETENTION_HOURS` | `24` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("BELLHOP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("BELLHOP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("BELLHOP_DATABASE_URL").ok();

        let local_db_path = env("BELLHOP_LOCAL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("bellhop-local.db"));

        let log_filter = env("BELLHOP_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let dedup_retention = Duration::from_secs(parse_secs(&env, "BELLHOP_DEDUP_RETENTION_SECS", 300));
        let dedup_sweep_interval = Duration::from_secs(parse_secs(&env, "BELLHOP_DEDUP_SWEEP_SECS", 60));
        let health_probe_interval =
            Duration::from_secs(parse_secs(&env, "BELLHOP_HEALTH_PROBE_SECS", 30));

        let offline_retention_hours = env("BELLHOP_OFFLINE_RETENTION_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .unwrap_or(24);

        Self {
            listen_addr,
            database_url,
            local_db_path,
            log_filter,
            dedup_retention,
            dedup_sweep_interval,
            health_probe_interval,
            offline_retention_hours,
        }
    }
}

fn parse_secs<F>(env: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.local_db_path, PathBuf::from("bellhop-local.db"));
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.dedup_retention, Duration::from_secs(300));
        assert_eq!(cfg.dedup_sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.health_probe_interval, Duration::from_secs(30));
        assert_eq!(cfg.offline_retention_hours, 24);
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("BELLHOP_HOST", "127.0.0.1");
        m.insert("BELLHOP_PORT", "3000");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("BELLHOP_PORT", "not_a_number");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("BELLHOP_DATABASE_URL", "postgres://u:p@host/bellhop");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/bellhop"));
    }

    #[test]
    fn tunable_intervals_from_env() {
        let mut m = HashMap::new();
        m.insert("BELLHOP_DEDUP_RETENTION_SECS", "120");
        m.insert("BELLHOP_DEDUP_SWEEP_SECS", "15");
        m.insert("BELLHOP_HEALTH_PROBE_SECS", "5");
        m.insert("BELLHOP_OFFLINE_RETENTION_HOURS", "48");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.dedup_retention, Duration::from_secs(120));
        assert_eq!(cfg.dedup_sweep_interval, Duration::from_secs(15));
        assert_eq!(cfg.health_probe_interval, Duration::from_secs(5));
        assert_eq!(cfg.offline_retention_hours, 48);
    }

    #[test]
    fn zero_or_garbage_intervals_fall_back() {
        let mut m = HashMap::new();
        m.insert("BELLHOP_DEDUP_RETENTION_SECS", "0");
        m.insert("BELLHOP_HEALTH_PROBE_SECS", "soon");
        m.insert("BELLHOP_OFFLINE_RETENTION_HOURS", "-1");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.dedup_retention, Duration::from_secs(300));
        assert_eq!(cfg.health_probe_interval, Duration::from_secs(30));
        assert_eq!(cfg.offline_retention_hours, 24);
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("BELLHOP_LOG_FILTER", "debug,bellhop_relay=trace");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,bellhop_relay=trace");
    }
}
