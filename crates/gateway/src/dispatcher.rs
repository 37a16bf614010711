//! Request dispatch: method routing, argument validation, reply frames.

use crate::client::{ClientRegistry, ClientState};
use crate::error::{GatewayError, Result};
use crate::protocol::{Feed, Method, ServerMessage};
use crate::queue::WorkItem;
use crate::reader::ChainReader;
use metrics::counter;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Routes parsed frames to their handlers and answers on the
/// originating session.
pub struct Dispatcher {
    reader: Arc<ChainReader>,
    registry: Arc<ClientRegistry>,
}

impl Dispatcher {
    pub fn new(reader: Arc<ChainReader>, registry: Arc<ClientRegistry>) -> Self {
        Self { reader, registry }
    }

    /// Drain the work queue until every sender is gone. Each request
    /// runs on its own task so a slow upstream call never blocks the
    /// queue; replies may therefore interleave across requests.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<WorkItem>) {
        while let Some((client, request)) = rx.recv().await {
            // work for a session that closed while queued is dropped
            if !self.registry.contains(&client.id) {
                debug!(client = %client.id, "dropping request for closed session");
                continue;
            }
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle(client, request).await;
            });
        }
    }

    /// Handle one parsed frame end to end.
    pub async fn handle(&self, client: Arc<ClientState>, request: crate::protocol::ClientRequest) {
        let id = request.echo_id();

        let method_name = match request.method.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let _ = client.send(&ServerMessage::error(id, "Method is required", "unknown"));
                return;
            }
        };

        let Some(method) = Method::resolve(&method_name) else {
            counter!("gateway_unsupported_methods_total").increment(1);
            let _ = client.send(&ServerMessage::error(
                id,
                format!("Unsupported method: {method_name}"),
                &method_name,
            ));
            return;
        };

        match self.execute(&client, method, &request.params).await {
            Ok(result) => {
                counter!("gateway_requests_total").increment(1);
                let _ = client.send(&ServerMessage::Response { id, result });
                if let Method::Subscribe(feed) = method {
                    self.send_snapshot(&client, feed);
                }
            }
            Err(err) => {
                if let GatewayError::Upstream(upstream_err) = &err {
                    // network failures also rotate the pool outside the
                    // retry loop, so unrelated calls start elsewhere
                    if upstream_err.is_network() {
                        self.reader.pool().failover();
                    }
                }
                counter!("gateway_request_errors_total").increment(1);
                let _ = client.send(&ServerMessage::error(id, err.to_string(), &method_name));
            }
        }
    }

    async fn execute(
        &self,
        client: &Arc<ClientState>,
        method: Method,
        params: &[Value],
    ) -> Result<Value> {
        match method {
            Method::DynamicGlobalProperties => self.reader.dynamic_global_properties().await,
            Method::BlockHeader => {
                let height = block_height_arg(params)?;
                self.reader.block_header(height).await
            }
            Method::Block => {
                let height = block_height_arg(params)?;
                self.reader.block(height).await
            }
            Method::OpsInBlock => {
                let height = block_height_arg(params)?;
                let only_virtual = params.get(1).and_then(Value::as_bool).unwrap_or(false);
                self.reader.ops_in_block(height, only_virtual).await
            }
            Method::ActiveWitnesses => self.reader.active_witnesses().await,
            Method::Transaction => {
                let tx_id = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or(GatewayError::InvalidArgument("Transaction id is required"))?;
                self.reader.transaction(tx_id).await
            }
            Method::Subscribe(feed) => {
                self.registry.subscribe(&client.id, feed);
                counter!("gateway_subscriptions_total").increment(1);
                Ok(json!({ "subscribed": true, "type": feed.as_str() }))
            }
            Method::Unsubscribe(feed) => {
                self.registry.unsubscribe(&client.id, feed);
                Ok(json!({ "unsubscribed": true, "type": feed.as_str() }))
            }
        }
    }

    /// Deliver the current slot value right after a subscribe ack, so a
    /// subscriber never waits a full poll period for its first datum.
    /// Only the always-materialized slots have one to give.
    fn send_snapshot(&self, client: &Arc<ClientState>, feed: Feed) {
        let snapshot = match feed {
            Feed::GlobalProperties => self.reader.cache().head.get_stale(),
            Feed::Witnesses => self.reader.cache().witnesses.get_stale(),
            _ => None,
        };
        if let Some(data) = snapshot {
            let _ = client.send(&ServerMessage::subscription_update(feed, data));
        }
    }
}

/// First positional argument as a block height. Numeric strings are
/// accepted since several client libraries send heights quoted.
fn block_height_arg(params: &[Value]) -> Result<u64> {
    params
        .first()
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .ok_or(GatewayError::InvalidArgument("Block number is required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_argument_accepts_numbers_and_numeric_strings() {
        assert_eq!(block_height_arg(&[json!(42)]).unwrap(), 42);
        assert_eq!(block_height_arg(&[json!("42")]).unwrap(), 42);
    }

    #[test]
    fn height_argument_rejects_missing_or_malformed() {
        for params in [vec![], vec![json!(null)], vec![json!("abc")], vec![json!(-1)]] {
            let err = block_height_arg(&params).unwrap_err();
            assert_eq!(err.to_string(), "Block number is required");
        }
    }
}
