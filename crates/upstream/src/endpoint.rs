//! Endpoint identity and health bookkeeping.

use std::time::Instant;

/// Health record for a single upstream endpoint.
///
/// Mutated only by the pool while it holds the pool lock; everything
/// else reads snapshots.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub healthy: bool,
    pub error_count: u64,
    pub last_error: Option<Instant>,
    pub last_success: Option<Instant>,
    /// Rolling mean over all successful calls, in milliseconds.
    pub avg_latency_ms: f64,
    pub total_requests: u64,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            error_count: 0,
            last_error: None,
            last_success: None,
            avg_latency_ms: 0.0,
            total_requests: 0,
        }
    }
}

impl EndpointHealth {
    /// Record one successful call and fold its latency into the mean.
    pub fn record_success(&mut self, latency_ms: f64) {
        self.healthy = true;
        self.last_success = Some(Instant::now());
        self.total_requests += 1;
        let n = self.total_requests as f64;
        self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + latency_ms) / n;
    }

    /// Record one failed call.
    pub fn record_failure(&mut self) {
        self.healthy = false;
        self.error_count += 1;
        self.last_error = Some(Instant::now());
    }
}

/// A configured upstream endpoint.
#[derive(Debug)]
pub struct Endpoint {
    pub url: String,
    pub health: EndpointHealth,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health: EndpointHealth::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_mean_matches_closed_form() {
        let mut health = EndpointHealth::default();
        health.record_success(100.0);
        health.record_success(200.0);
        health.record_success(300.0);
        assert_eq!(health.total_requests, 3);
        assert!((health.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failure_marks_unhealthy_and_counts() {
        let mut health = EndpointHealth::default();
        assert!(health.healthy);
        health.record_failure();
        assert!(!health.healthy);
        assert_eq!(health.error_count, 1);
        assert!(health.last_error.is_some());

        // a later success restores the healthy flag
        health.record_success(50.0);
        assert!(health.healthy);
        assert_eq!(health.error_count, 1);
    }
}
