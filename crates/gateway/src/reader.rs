//! Cached read handlers over the upstream pool.
//!
//! One method per supported read. Slots follow get-or-refresh with
//! stale-on-error; the per-block maps are lookup/store with no stale
//! path (an expired entry was already dropped at lookup). Every cached
//! read first checks the pool's switch generation and drops the cache
//! when the pool has moved to a different endpoint.

use crate::cache::{ChainCache, TimedSlot};
use crate::config::Config;
use crate::error::Result;
use serde_json::{json, Value};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use upstream::{call_with_retry, UpstreamPool};

/// Pull the head height out of a dynamic global properties payload.
pub fn head_block_number(props: &Value) -> Option<u64> {
    props.get("head_block_number").and_then(Value::as_u64)
}

/// Cached facade over the upstream pool.
pub struct ChainReader {
    pool: Arc<UpstreamPool>,
    cache: Arc<ChainCache>,
    head_ttl: Duration,
    block_ttl: Duration,
    witness_ttl: Duration,
    /// Last pool generation this reader has reconciled the cache with.
    seen_generation: AtomicU64,
}

impl ChainReader {
    pub fn new(pool: Arc<UpstreamPool>, cache: Arc<ChainCache>, config: &Config) -> Self {
        Self {
            seen_generation: AtomicU64::new(pool.generation()),
            pool,
            cache,
            head_ttl: config.head_ttl,
            block_ttl: config.block_ttl,
            witness_ttl: config.witness_ttl,
        }
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    /// Drop the cache if the pool switched endpoints since we last
    /// looked. Different endpoints may disagree near the head.
    fn sync_generation(&self) {
        let generation = self.pool.generation();
        if self.seen_generation.swap(generation, Ordering::Relaxed) != generation {
            debug!("endpoint switch detected, dropping caches");
            self.cache.clear_all();
        }
    }

    pub async fn dynamic_global_properties(&self) -> Result<Value> {
        self.slot_read(
            &self.cache.head,
            self.head_ttl,
            "condenser_api.get_dynamic_global_properties",
        )
        .await
    }

    pub async fn active_witnesses(&self) -> Result<Value> {
        self.slot_read(
            &self.cache.witnesses,
            self.witness_ttl,
            "condenser_api.get_active_witnesses",
        )
        .await
    }

    pub async fn block_header(&self, height: u64) -> Result<Value> {
        self.map_read(
            &self.cache.headers,
            height,
            "condenser_api.get_block_header",
            json!([height]),
        )
        .await
    }

    pub async fn block(&self, height: u64) -> Result<Value> {
        self.map_read(
            &self.cache.blocks,
            height,
            "condenser_api.get_block",
            json!([height]),
        )
        .await
    }

    pub async fn ops_in_block(&self, height: u64, only_virtual: bool) -> Result<Value> {
        self.map_read(
            &self.cache.ops,
            (height, only_virtual),
            "condenser_api.get_ops_in_block",
            json!([height, only_virtual]),
        )
        .await
    }

    /// Uncached pass-through.
    pub async fn transaction(&self, id: &str) -> Result<Value> {
        self.sync_generation();
        Ok(call_with_retry(&self.pool, "condenser_api.get_transaction", &json!([id])).await?)
    }

    /// Direct head call bypassing cache and retry, for the health probe.
    pub async fn probe_head(&self) -> Result<Value> {
        Ok(self
            .pool
            .call("condenser_api.get_dynamic_global_properties", &json!([]))
            .await?)
    }

    async fn slot_read(&self, slot: &TimedSlot<Value>, ttl: Duration, method: &str) -> Result<Value> {
        self.sync_generation();

        if let Some(value) = slot.get(ttl) {
            self.cache.stats.record_hit();
            return Ok(value);
        }

        match call_with_retry(&self.pool, method, &json!([])).await {
            Ok(value) => {
                self.after_refresh();
                slot.put(value.clone());
                self.cache.stats.record_miss();
                Ok(value)
            }
            Err(err) => match slot.get_stale() {
                Some(value) => {
                    warn!(method, error = %err, "refresh failed, serving stale value");
                    self.cache.stats.record_degraded();
                    Ok(value)
                }
                None => Err(err.into()),
            },
        }
    }

    async fn map_read<K: Eq + Hash + Clone>(
        &self,
        map: &crate::cache::BoundedCache<K, Value>,
        key: K,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.sync_generation();

        if let Some(value) = map.lookup(&key, self.block_ttl) {
            self.cache.stats.record_hit();
            return Ok(value);
        }

        let value = call_with_retry(&self.pool, method, &params).await?;
        self.after_refresh();
        map.insert(key, value.clone());
        self.cache.stats.record_miss();
        Ok(value)
    }

    /// A retry may have rotated the pool mid-call. The value we are
    /// about to store came from the endpoint the pool ended on, so drop
    /// everything older before storing it.
    fn after_refresh(&self) {
        let generation = self.pool.generation();
        if self.seen_generation.swap(generation, Ordering::Relaxed) != generation {
            self.cache.clear_all();
        }
    }
}
