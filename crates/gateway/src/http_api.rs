//! HTTP introspection endpoints served beside the WebSocket upgrade.
//!
//! Routes:
//! - GET /health - liveness check
//! - GET /status - service document with connection, cache, and
//!   upstream detail
//! - anything else - descriptive service document

use crate::protocol::Feed;
use crate::ws_server::AppState;
use axum::{extract::State, http::HeaderValue, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub const SERVICE_NAME: &str = "hive-websocket-gateway";

/// CORS from the configured origin list; an empty list is permissive.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Liveness check.
/// GET /health
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Full service status.
/// GET /status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed();
    let cache = state.reader.cache();
    let (endpoint_index, endpoint_url) = state.reader.pool().current_endpoint();

    let subscribers: serde_json::Map<String, Value> = Feed::ALL
        .iter()
        .map(|feed| {
            (
                feed.as_str().to_string(),
                json!(state.registry.subscriber_count(*feed)),
            )
        })
        .collect();

    Json(json!({
        "service": SERVICE_NAME,
        "status": "ok",
        "uptimeMs": uptime.as_millis() as u64,
        "uptime": humanize(uptime),
        "connectedClients": state.registry.client_count(),
        "subscribers": subscribers,
        "queueLength": state.queue.len(),
        "upstream": {
            "endpoint": endpoint_url,
            "index": endpoint_index,
            "endpoints": state.reader.pool().health_snapshot(),
        },
        "cache": {
            "hits": cache.stats.hits(),
            "misses": cache.stats.misses(),
            "degradedHits": cache.stats.degraded_hits(),
            "apiCallsSaved": cache.stats.hits() + cache.stats.degraded_hits(),
            "headState": freshness(cache.head.age(), state.config.head_ttl),
            "witnesses": freshness(cache.witnesses.age(), state.config.witness_ttl),
        },
    }))
}

/// Descriptive document for any unknown path.
pub async fn service_document(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "description": "WebSocket fan-out gateway for Hive JSON-RPC reads and live feeds",
        "endpoints": {
            "websocket": "/ws",
            "health": "/health",
            "status": "/status",
        },
        "rateLimits": {
            "requestsPerMinute": state.config.requests_per_minute,
        },
    }))
}

fn freshness(age: Option<Duration>, ttl: Duration) -> Value {
    match age {
        Some(age) => json!({
            "cached": true,
            "ageMs": age.as_millis() as u64,
            "fresh": age <= ttl,
        }),
        None => json!({ "cached": false }),
    }
}

fn humanize(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_humanized_by_magnitude() {
        assert_eq!(humanize(Duration::from_secs(42)), "42s");
        assert_eq!(humanize(Duration::from_secs(90)), "1m 30s");
        assert_eq!(humanize(Duration::from_secs(3720)), "1h 2m");
    }

    #[test]
    fn freshness_reports_missing_slots() {
        let value = freshness(None, Duration::from_secs(3));
        assert_eq!(value, json!({ "cached": false }));

        let value = freshness(Some(Duration::from_secs(1)), Duration::from_secs(3));
        assert_eq!(value["cached"], true);
        assert_eq!(value["fresh"], true);

        let value = freshness(Some(Duration::from_secs(10)), Duration::from_secs(3));
        assert_eq!(value["fresh"], false);
    }
}
