//! Hive JSON-RPC upstream pool.
//!
//! This crate owns everything between the gateway and the remote API
//! nodes:
//! - A transport seam ([`RpcTransport`]) so the pool can be exercised
//!   against scripted endpoints in tests.
//! - An ordered endpoint pool with per-endpoint health records, sticky
//!   selection, and ranked failover ([`UpstreamPool`]).
//! - A retrying caller that rotates endpoints and backs off between
//!   attempts ([`call_with_retry`]).
//!
//! The pool never writes to the chain; every call is a read method.

pub mod endpoint;
pub mod error;
pub mod pool;
pub mod retry;
pub mod transport;

pub use endpoint::{Endpoint, EndpointHealth};
pub use error::{Error, Result};
pub use pool::{EndpointSnapshot, UpstreamPool};
pub use retry::call_with_retry;
pub use transport::{HttpTransport, RpcTransport};
