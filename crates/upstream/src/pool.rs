//! Upstream pool with sticky selection and health-ranked failover.

use crate::endpoint::{Endpoint, EndpointHealth};
use crate::error::{Error, Result};
use crate::transport::RpcTransport;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a failed endpoint stays out of failover candidacy.
const RECOVERY_WINDOW: Duration = Duration::from_secs(60);

/// Successful calls slower than this are logged; latency alone never
/// forces a rotation.
const SLOW_CALL_MS: f64 = 2000.0;

/// Point-in-time view of one endpoint, for introspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    pub url: String,
    pub healthy: bool,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub total_requests: u64,
}

struct PoolInner {
    endpoints: Vec<Endpoint>,
    current: usize,
}

/// Ordered list of upstream endpoints with per-endpoint health records.
///
/// Selection is sticky: every call targets the current endpoint until
/// [`failover`](UpstreamPool::failover) rotates it. The switch
/// generation is bumped on every rotation so consumers holding derived
/// state (caches) can notice and drop it.
pub struct UpstreamPool {
    transport: Arc<dyn RpcTransport>,
    inner: Mutex<PoolInner>,
    generation: AtomicU64,
}

impl UpstreamPool {
    pub fn new(urls: Vec<String>, transport: Arc<dyn RpcTransport>) -> Result<Self> {
        if urls.is_empty() {
            return Err(Error::NoEndpoints);
        }
        let endpoints = urls.into_iter().map(Endpoint::new).collect();
        Ok(Self {
            transport,
            inner: Mutex::new(PoolInner {
                endpoints,
                current: 0,
            }),
            generation: AtomicU64::new(0),
        })
    }

    /// Index and URL of the sticky current endpoint.
    pub fn current_endpoint(&self) -> (usize, String) {
        let inner = self.inner.lock();
        (inner.current, inner.endpoints[inner.current].url.clone())
    }

    /// Monotonic counter bumped on every endpoint switch.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    /// Health view of every endpoint, current first preserved by index.
    pub fn health_snapshot(&self) -> Vec<EndpointSnapshot> {
        let inner = self.inner.lock();
        inner
            .endpoints
            .iter()
            .map(|e| EndpointSnapshot {
                url: e.url.clone(),
                healthy: e.health.healthy,
                error_count: e.health.error_count,
                avg_latency_ms: e.health.avg_latency_ms,
                total_requests: e.health.total_requests,
            })
            .collect()
    }

    /// One call against the current endpoint, with the health update
    /// applied afterwards. The lock is never held across the wire call.
    pub async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        let (index, url) = self.current_endpoint();

        let started = Instant::now();
        let result = self.transport.call(&url, method, params).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut inner = self.inner.lock();
        match &result {
            Ok(_) => {
                inner.endpoints[index].health.record_success(latency_ms);
                counter!("upstream_calls_total").increment(1);
                if latency_ms > SLOW_CALL_MS {
                    warn!(url = %url, latency_ms, "slow upstream response");
                }
            }
            Err(err) => {
                inner.endpoints[index].health.record_failure();
                counter!("upstream_call_errors_total").increment(1);
                warn!(url = %url, error = %err, "upstream call failed");
            }
        }

        result
    }

    /// Rotate to the best eligible endpoint other than the current one.
    ///
    /// Eligible means healthy, or last error older than the recovery
    /// window. Candidates are ranked healthy first, then by fewer
    /// errors, then by lower average latency. With no eligible
    /// candidate the current endpoint is retained.
    ///
    /// Returns true when the pool actually switched.
    pub fn failover(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.endpoints.len() < 2 {
            return false;
        }

        let now = Instant::now();
        let current = inner.current;
        let mut candidates: Vec<usize> = (0..inner.endpoints.len())
            .filter(|&i| i != current)
            .filter(|&i| {
                let h = &inner.endpoints[i].health;
                h.healthy
                    || h.last_error
                        .map_or(true, |t| now.duration_since(t) >= RECOVERY_WINDOW)
            })
            .collect();

        if candidates.is_empty() {
            return false;
        }

        candidates.sort_by(|&a, &b| {
            let ha: &EndpointHealth = &inner.endpoints[a].health;
            let hb: &EndpointHealth = &inner.endpoints[b].health;
            hb.healthy
                .cmp(&ha.healthy)
                .then(ha.error_count.cmp(&hb.error_count))
                .then(
                    ha.avg_latency_ms
                        .partial_cmp(&hb.avg_latency_ms)
                        .unwrap_or(CmpOrdering::Equal),
                )
        });

        let next = candidates[0];
        inner.current = next;
        self.generation.fetch_add(1, Ordering::Relaxed);
        counter!("upstream_failovers_total").increment(1);
        info!(
            from = %inner.endpoints[current].url,
            to = %inner.endpoints[next].url,
            "rotated upstream endpoint"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Transport that succeeds or fails per configured URL.
    struct ScriptedTransport {
        failing: Vec<String>,
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn call(&self, url: &str, _method: &str, _params: &Value) -> Result<Value> {
            if self.failing.iter().any(|f| f == url) {
                Err(Error::Timeout)
            } else {
                Ok(json!({ "from": url }))
            }
        }
    }

    fn pool_with(urls: &[&str], failing: &[&str]) -> UpstreamPool {
        UpstreamPool::new(
            urls.iter().map(|s| s.to_string()).collect(),
            Arc::new(ScriptedTransport {
                failing: failing.iter().map(|s| s.to_string()).collect(),
            }),
        )
        .unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        let result = UpstreamPool::new(vec![], Arc::new(ScriptedTransport { failing: vec![] }));
        assert!(matches!(result, Err(Error::NoEndpoints)));
    }

    #[tokio::test]
    async fn success_updates_health_record() {
        let pool = pool_with(&["http://one", "http://two"], &[]);
        pool.call("condenser_api.get_dynamic_global_properties", &json!([]))
            .await
            .unwrap();

        let snapshot = pool.health_snapshot();
        assert!(snapshot[0].healthy);
        assert_eq!(snapshot[0].total_requests, 1);
        assert_eq!(snapshot[1].total_requests, 0);
    }

    #[tokio::test]
    async fn failure_marks_endpoint_and_failover_rotates() {
        let pool = pool_with(&["http://one", "http://two"], &["http://one"]);
        assert!(pool
            .call("condenser_api.get_dynamic_global_properties", &json!([]))
            .await
            .is_err());

        let generation = pool.generation();
        assert!(pool.failover());
        let (index, url) = pool.current_endpoint();
        assert_eq!(index, 1);
        assert_eq!(url, "http://two");
        assert_eq!(pool.generation(), generation + 1);
    }

    #[tokio::test]
    async fn failover_skips_recently_failed_endpoints() {
        let pool = pool_with(&["http://one", "http://two"], &["http://two"]);

        // drive endpoint 1 into the recovery window
        pool.failover();
        assert!(pool
            .call("condenser_api.get_dynamic_global_properties", &json!([]))
            .await
            .is_err());

        // endpoint 0 is still healthy, so the pool rotates back to it
        assert!(pool.failover());
        assert_eq!(pool.current_endpoint().0, 0);

        // endpoint 1 just failed and is the only alternative; the pool
        // retains the current endpoint instead
        assert!(!pool.failover());
        assert_eq!(pool.current_endpoint().0, 0);
    }

    #[tokio::test]
    async fn failover_prefers_fewer_errors_then_latency() {
        let pool = pool_with(&["http://a", "http://b", "http://c"], &[]);
        {
            let mut inner = pool.inner.lock();
            inner.endpoints[1].health.record_success(500.0);
            inner.endpoints[2].health.record_success(50.0);
        }
        assert!(pool.failover());
        // b and c are both healthy with zero errors; c wins on latency
        assert_eq!(pool.current_endpoint().1, "http://c");
    }

    #[test]
    fn single_endpoint_never_rotates() {
        let pool = pool_with(&["http://only"], &[]);
        assert!(!pool.failover());
        assert_eq!(pool.generation(), 0);
    }
}
