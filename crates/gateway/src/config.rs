//! Environment-driven configuration with embedded defaults.

use std::env;
use std::time::Duration;

/// Public Hive API nodes used when `HIVE_RPC_NODES` is not set.
pub const DEFAULT_ENDPOINTS: [&str; 4] = [
    "https://api.hive.blog",
    "https://api.openhive.network",
    "https://anyx.io",
    "https://api.deathwing.me",
];

/// Runtime configuration.
///
/// Only the listen ports, the endpoint list, the CORS origin list, and
/// the witness cache TTL are read from the environment; the remaining
/// tunables keep their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket + HTTP listen port.
    pub port: u16,
    /// Prometheus exporter port.
    pub metrics_port: u16,
    /// Upstream JSON-RPC endpoints, in preference order.
    pub endpoints: Vec<String>,
    /// CORS origins. Empty means permissive.
    pub allowed_origins: Vec<String>,
    /// Open-connection cap.
    pub max_connections: usize,
    /// Per-session frame budget per 60 s window.
    pub requests_per_minute: u32,
    /// Work queue bound.
    pub queue_bound: usize,
    /// Head-state slot TTL.
    pub head_ttl: Duration,
    /// Per-block map TTL (headers, blocks, operations).
    pub block_ttl: Duration,
    /// Witness slot TTL. Env-tunable between 60 s and 300 s.
    pub witness_ttl: Duration,
    /// Entry bound for each per-block map.
    pub block_cache_capacity: usize,
    /// Head poll period.
    pub poll_interval: Duration,
    /// Health probe period; stale-session sweep shares this cadence.
    pub probe_interval: Duration,
    /// Per-call upstream deadline.
    pub upstream_timeout: Duration,
    /// Sessions silent for longer than this are swept.
    pub client_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            metrics_port: 9091,
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            allowed_origins: Vec::new(),
            max_connections: 100,
            requests_per_minute: 2000,
            queue_bound: 1000,
            head_ttl: Duration::from_secs(3),
            block_ttl: Duration::from_secs(300),
            witness_ttl: Duration::from_secs(300),
            block_cache_capacity: 100,
            poll_interval: Duration::from_secs(3),
            probe_interval: Duration::from_secs(30),
            upstream_timeout: Duration::from_secs(10),
            client_idle_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Read overrides from the environment; anything unset keeps its
    /// default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(port) = env::var("PORT") {
            cfg.port = port.parse().expect("PORT must be a number");
        }
        if let Ok(port) = env::var("METRICS_PORT") {
            cfg.metrics_port = port.parse().expect("METRICS_PORT must be a number");
        }
        if let Ok(nodes) = env::var("HIVE_RPC_NODES") {
            let list = parse_list(&nodes);
            if !list.is_empty() {
                cfg.endpoints = list;
            }
        }
        if let Ok(origins) = env::var("ALLOWED_ORIGINS") {
            cfg.allowed_origins = parse_list(&origins);
        }
        if let Ok(ttl) = env::var("WITNESS_CACHE_TTL_SECS") {
            let secs: u64 = ttl.parse().expect("WITNESS_CACHE_TTL_SECS must be a number");
            cfg.witness_ttl = Duration::from_secs(secs.clamp(60, 300));
        }

        cfg
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_parsing_trims_and_drops_empties() {
        let list = parse_list("https://a.example, https://b.example ,,");
        assert_eq!(list, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn defaults_carry_embedded_endpoints() {
        let cfg = Config::default();
        assert_eq!(cfg.endpoints.len(), DEFAULT_ENDPOINTS.len());
        assert_eq!(cfg.requests_per_minute, 2000);
        assert_eq!(cfg.queue_bound, 1000);
    }
}
