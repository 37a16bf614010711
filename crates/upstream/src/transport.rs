//! Transport seam between the pool and the wire.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// One JSON-RPC call against a named endpoint.
///
/// The pool only ever talks to the chain through this trait, so tests
/// can substitute scripted endpoints without a network.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, url: &str, method: &str, params: &Value) -> Result<Value>;
}

/// JSON-RPC 2.0 over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with a per-call deadline.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, url: &str, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.http.post(url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        let envelope: Value = response.json().await?;

        if let Some(err) = envelope.get("error") {
            return Err(Error::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        envelope.get("result").cloned().ok_or(Error::MissingResult)
    }
}
