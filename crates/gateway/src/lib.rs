//! WebSocket fan-out gateway for Hive JSON-RPC endpoints.
//!
//! The gateway sits between many lightweight WebSocket clients and a
//! small pool of upstream API nodes. Clients issue request/reply calls
//! against a closed set of read methods or subscribe to live feeds the
//! gateway maintains by polling head state.
//!
//! ## Architecture
//!
//! ```text
//! client frame -> admission (cap, rate window) -> work queue
//!       -> dispatcher -> cache | retrying pool call -> reply frame
//!
//! poll driver -> head refresh -> change detection
//!       -> subscription registry fan-out (+ legacy broadcast)
//! ```
//!
//! Upstream load is reduced three ways: identical reads are coalesced
//! through a tiered cache with per-entity freshness windows, head
//! polling is shared across every client, and unhealthy endpoints are
//! rotated out under a health score.

pub mod cache;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http_api;
pub mod poll;
pub mod protocol;
pub mod queue;
pub mod reader;
pub mod ws_server;

pub use cache::{BoundedCache, ChainCache, TimedSlot};
pub use client::{ClientId, ClientRegistry, ClientState};
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{GatewayError, Result};
pub use poll::PollDriver;
pub use protocol::{ClientRequest, Feed, Method, ServerMessage};
pub use queue::{work_queue, WorkQueue};
pub use reader::ChainReader;
pub use ws_server::{create_router, AppState};
