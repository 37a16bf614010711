//! WebSocket front-end using Axum: admission, socket lifecycle, frame
//! intake.
//!
//! Every accepted socket gets an unbounded outbound channel and a write
//! task; the read loop parses frames, applies the per-session rate
//! window, and pushes work onto the bounded queue. The HTTP
//! introspection routes share this router.

use crate::client::{ClientRegistry, ClientState, RateDecision};
use crate::config::Config;
use crate::http_api;
use crate::protocol::{
    ClientRequest, RateLimits, ServerMessage, AVAILABLE_APIS, SUBSCRIPTION_APIS,
};
use crate::queue::WorkQueue;
use crate::reader::ChainReader;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::json;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

/// Close code sent when the connection cap is reached (try again later).
const CLOSE_CAPACITY: u16 = 1013;

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub reader: Arc<ChainReader>,
    pub queue: WorkQueue,
    pub config: Config,
    pub started_at: Instant,
}

/// Create the router serving `/ws` plus the introspection routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = http_api::cors_layer(&state.config.allowed_origins);
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http_api::health_handler))
        .route("/status", get(http_api::status_handler))
        .fallback(http_api::service_document)
        .with_state(state)
        .layer(cors)
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection from accept to close.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    if state.registry.client_count() >= state.config.max_connections {
        counter!("gateway_connections_rejected_total").increment(1);
        warn!("connection cap reached, refusing socket");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_CAPACITY,
                reason: "server at capacity".into(),
            })))
            .await;
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let client = Arc::new(ClientState::new(tx, state.config.requests_per_minute));
    let client_id = state.registry.register(client.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.client_count() as f64);
    info!(client = %client_id, "client connected");

    let _ = client.send(&hello_frame(&state.config));

    // forward outbound frames from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if handle_frame(&state, &client, msg).is_break() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if client.tx.send(Message::Ping(vec![].into())).is_err() {
                    break;
                }
            }
        }
    }

    state.registry.unregister(&client_id);
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.client_count() as f64);
    info!(client = %client_id, "client disconnected");
}

/// Handle one raw WebSocket message.
fn handle_frame(state: &AppState, client: &Arc<ClientState>, msg: Message) -> ControlFlow<()> {
    match msg {
        Message::Text(text) => {
            intake(state, client, text.as_bytes());
            ControlFlow::Continue(())
        }
        Message::Binary(data) => {
            intake(state, client, &data);
            ControlFlow::Continue(())
        }
        Message::Ping(data) => {
            client.update_ping();
            let _ = client.tx.send(Message::Pong(data));
            ControlFlow::Continue(())
        }
        Message::Pong(_) => {
            client.update_ping();
            ControlFlow::Continue(())
        }
        Message::Close(_) => ControlFlow::Break(()),
    }
}

/// Parse, rate-limit, and enqueue one inbound frame. Every rejection
/// answers on the session; none of them drop the connection.
fn intake(state: &AppState, client: &Arc<ClientState>, raw: &[u8]) {
    let request: ClientRequest = match serde_json::from_slice(raw) {
        Ok(request) => request,
        Err(_) => {
            counter!("gateway_invalid_frames_total").increment(1);
            let _ = client.send(&ServerMessage::error(
                json!("unknown"),
                "Invalid JSON message",
                "unknown",
            ));
            return;
        }
    };

    let id = request.echo_id();
    let method = request.method.clone().unwrap_or_default();

    match client.admit_frame() {
        RateDecision::Limited { reset_at_ms } => {
            counter!("gateway_rate_limited_total").increment(1);
            let _ = client.send(&ServerMessage::rate_limited(id, method, reset_at_ms));
        }
        RateDecision::Allowed => {
            if state.queue.push((client.clone(), request)).is_err() {
                counter!("gateway_queue_rejections_total").increment(1);
                let _ = client.send(&ServerMessage::error(
                    id,
                    "Server busy, request queue full",
                    method,
                ));
            }
        }
    }
}

fn hello_frame(config: &Config) -> ServerMessage {
    ServerMessage::Connection {
        status: "connected".to_string(),
        message: "Connected to Hive WebSocket gateway".to_string(),
        available_apis: AVAILABLE_APIS.to_vec(),
        subscription_apis: SUBSCRIPTION_APIS.to_vec(),
        rate_limits: RateLimits {
            requests_per_minute: config.requests_per_minute,
            subscriptions_unlimited: true,
        },
    }
}
