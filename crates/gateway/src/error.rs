//! Gateway error types.

use thiserror::Error;

/// Gateway error type. Every variant's display string is what clients
/// see in error frames.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream call exhausted its retries.
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] upstream::Error),

    /// A required argument was missing or malformed.
    #[error("{0}")]
    InvalidArgument(&'static str),

    /// Outbound channel to the client is gone.
    #[error("Channel send error")]
    ChannelSend,
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
