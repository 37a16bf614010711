//! Bounded retry with failover and backoff.

use crate::error::Result;
use crate::pool::UpstreamPool;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Attempts per logical call, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff between attempts grows linearly on this base.
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Call with up to [`MAX_ATTEMPTS`] attempts. Each failed attempt
/// rotates the pool and sleeps `attempt * base` before the next one.
/// The error from the final attempt is returned unchanged.
pub async fn call_with_retry(pool: &UpstreamPool, method: &str, params: &Value) -> Result<Value> {
    let mut attempt = 1;
    loop {
        match pool.call(method, params).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS => {
                warn!(method, attempt, error = %err, "upstream attempt failed, rotating");
                pool.failover();
                tokio::time::sleep(BACKOFF_BASE * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::RpcTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls regardless of endpoint.
    struct FlakyTransport {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RpcTransport for FlakyTransport {
        async fn call(&self, url: &str, _method: &str, _params: &Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                Err(Error::Timeout)
            } else {
                Ok(json!({ "from": url }))
            }
        }
    }

    fn pool(failures: u32) -> (UpstreamPool, Arc<FlakyTransport>) {
        let transport = Arc::new(FlakyTransport {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        });
        let pool = UpstreamPool::new(
            vec!["http://one".into(), "http://two".into()],
            transport.clone(),
        )
        .unwrap();
        (pool, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let (pool, transport) = pool(2);
        let value = call_with_retry(&pool, "condenser_api.get_block", &json!([1]))
            .await
            .unwrap();
        // two failures, then the third attempt lands on the rotated endpoint
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(value["from"], "http://two");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_propagates_the_last_error() {
        let (pool, transport) = pool(10);
        let err = call_with_retry(&pool, "condenser_api.get_block", &json!([1]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(transport.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rotate_the_pool() {
        let (pool, _) = pool(1);
        assert_eq!(pool.current_endpoint().0, 0);
        call_with_retry(&pool, "condenser_api.get_block", &json!([1]))
            .await
            .unwrap();
        assert_eq!(pool.current_endpoint().0, 1);
    }
}
