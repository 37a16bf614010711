//! Upstream error types.

use thiserror::Error;

/// Upstream error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP-level failure (connect, TLS, timeout, body).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success HTTP status.
    #[error("API error: {0}")]
    Api(String),

    /// Endpoint answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The call exceeded the configured deadline.
    #[error("upstream call timed out")]
    Timeout,

    /// Response body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed envelope with neither `result` nor `error`.
    #[error("upstream response missing result")]
    MissingResult,

    /// Pool constructed with an empty endpoint list.
    #[error("no upstream endpoints configured")]
    NoEndpoints,
}

impl Error {
    /// True for failures that indicate the endpoint itself is unreachable
    /// or unresponsive, as opposed to a well-formed RPC-level rejection.
    /// These are the errors that should push callers onto another endpoint.
    pub fn is_network(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Result type for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;
