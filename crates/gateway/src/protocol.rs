//! Wire protocol frames and method resolution.
//!
//! Inbound frames carry `{id, method, params}`. Method names are
//! resolved at parse time into a closed sum; the bare form and the
//! `condenser_api.` / `market_history_api.` prefixed forms map to the
//! same handler.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Namespace prefixes accepted in front of every method name.
pub const API_PREFIXES: [&str; 2] = ["condenser_api.", "market_history_api."];

/// Read methods advertised in the connection hello.
pub const AVAILABLE_APIS: [&str; 6] = [
    "get_dynamic_global_properties",
    "get_block_header",
    "get_block",
    "get_ops_in_block",
    "get_active_witnesses",
    "get_transaction",
];

/// Feed control methods advertised in the connection hello.
pub const SUBSCRIPTION_APIS: [&str; 10] = [
    "subscribe_global_properties",
    "unsubscribe_global_properties",
    "subscribe_block_headers",
    "unsubscribe_block_headers",
    "subscribe_blocks",
    "unsubscribe_blocks",
    "subscribe_operations",
    "unsubscribe_operations",
    "subscribe_witnesses",
    "unsubscribe_witnesses",
];

// ============================================================================
// Client → Server
// ============================================================================

/// Inbound request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRequest {
    /// Client-chosen correlation id, echoed back verbatim.
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl ClientRequest {
    /// The id to echo in reply frames; frames without one get "unknown".
    pub fn echo_id(&self) -> Value {
        if self.id.is_null() {
            json!("unknown")
        } else {
            self.id.clone()
        }
    }
}

// ============================================================================
// Server → Client
// ============================================================================

/// Rate limit summary in the connection hello.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub subscriptions_unlimited: bool,
}

/// Outbound frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Successful reply to a request frame.
    Response { id: Value, result: Value },
    /// Error reply; `method` names the handler that rejected the frame.
    Error {
        id: Value,
        error: String,
        method: String,
        #[serde(rename = "rateLimitReset", skip_serializing_if = "Option::is_none")]
        rate_limit_reset: Option<i64>,
    },
    /// Hello frame sent once per accepted connection.
    #[serde(rename_all = "camelCase")]
    Connection {
        status: String,
        message: String,
        available_apis: Vec<&'static str>,
        subscription_apis: Vec<&'static str>,
        rate_limits: RateLimits,
    },
    /// Periodic datum for a subscribed feed.
    SubscriptionUpdate {
        subscription: String,
        data: Value,
        timestamp: i64,
    },
    /// Head-change notification for sessions without a subscription,
    /// kept for wire compatibility with older clients.
    Broadcast {
        method: String,
        data: Value,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn error(id: Value, error: impl Into<String>, method: impl Into<String>) -> Self {
        ServerMessage::Error {
            id,
            error: error.into(),
            method: method.into(),
            rate_limit_reset: None,
        }
    }

    pub fn rate_limited(id: Value, method: impl Into<String>, reset_at_ms: i64) -> Self {
        ServerMessage::Error {
            id,
            error: "Rate limit exceeded".to_string(),
            method: method.into(),
            rate_limit_reset: Some(reset_at_ms),
        }
    }

    pub fn subscription_update(feed: Feed, data: Value) -> Self {
        ServerMessage::SubscriptionUpdate {
            subscription: feed.as_str().to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn legacy_broadcast(data: Value) -> Self {
        ServerMessage::Broadcast {
            method: "dynamic_global_properties_update".to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

// ============================================================================
// Methods and feeds
// ============================================================================

/// Live feeds served by the poll driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    GlobalProperties,
    BlockHeaders,
    Blocks,
    Operations,
    Witnesses,
}

impl Feed {
    pub const ALL: [Feed; 5] = [
        Feed::GlobalProperties,
        Feed::BlockHeaders,
        Feed::Blocks,
        Feed::Operations,
        Feed::Witnesses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::GlobalProperties => "global_properties",
            Feed::BlockHeaders => "block_headers",
            Feed::Blocks => "blocks",
            Feed::Operations => "operations",
            Feed::Witnesses => "witnesses",
        }
    }
}

/// Closed set of supported calls, resolved at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    DynamicGlobalProperties,
    BlockHeader,
    Block,
    OpsInBlock,
    ActiveWitnesses,
    Transaction,
    Subscribe(Feed),
    Unsubscribe(Feed),
}

impl Method {
    /// Resolve a wire method name, accepting both the bare form and the
    /// namespaced forms. Unknown names resolve to `None`.
    pub fn resolve(name: &str) -> Option<Method> {
        let bare = API_PREFIXES
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
            .unwrap_or(name);

        match bare {
            "get_dynamic_global_properties" => Some(Method::DynamicGlobalProperties),
            "get_block_header" => Some(Method::BlockHeader),
            "get_block" => Some(Method::Block),
            "get_ops_in_block" => Some(Method::OpsInBlock),
            "get_active_witnesses" => Some(Method::ActiveWitnesses),
            "get_transaction" => Some(Method::Transaction),
            "subscribe_global_properties" => Some(Method::Subscribe(Feed::GlobalProperties)),
            "unsubscribe_global_properties" => Some(Method::Unsubscribe(Feed::GlobalProperties)),
            "subscribe_block_headers" => Some(Method::Subscribe(Feed::BlockHeaders)),
            "unsubscribe_block_headers" => Some(Method::Unsubscribe(Feed::BlockHeaders)),
            "subscribe_blocks" => Some(Method::Subscribe(Feed::Blocks)),
            "unsubscribe_blocks" => Some(Method::Unsubscribe(Feed::Blocks)),
            "subscribe_operations" => Some(Method::Subscribe(Feed::Operations)),
            "unsubscribe_operations" => Some(Method::Unsubscribe(Feed::Operations)),
            "subscribe_witnesses" => Some(Method::Subscribe(Feed::Witnesses)),
            "unsubscribe_witnesses" => Some(Method::Unsubscribe(Feed::Witnesses)),
            _ => None,
        }
    }
}
