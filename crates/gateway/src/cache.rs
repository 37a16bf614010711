//! Tiered response cache: singleton TTL slots and bounded keyed maps.
//!
//! Head state and the witness list live in slots that may be served
//! stale when a refresh fails. Per-block artifacts live in bounded maps
//! with oldest-inserted eviction; a block past the head never changes,
//! so expiry there only limits memory, not correctness.

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct Timed<V> {
    value: V,
    stored_at: Instant,
}

impl<V> Timed<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }
}

/// Singleton slot holding the latest snapshot of a value.
pub struct TimedSlot<T> {
    inner: Mutex<Option<Timed<T>>>,
}

impl<T: Clone> TimedSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// The value, if stored within `ttl`.
    pub fn get(&self, ttl: Duration) -> Option<T> {
        let inner = self.inner.lock();
        inner
            .as_ref()
            .filter(|t| t.stored_at.elapsed() <= ttl)
            .map(|t| t.value.clone())
    }

    /// The value regardless of age. Fallback path for failed refreshes.
    pub fn get_stale(&self) -> Option<T> {
        self.inner.lock().as_ref().map(|t| t.value.clone())
    }

    pub fn put(&self, value: T) {
        *self.inner.lock() = Some(Timed::new(value));
    }

    /// Age of the stored value, if any.
    pub fn age(&self) -> Option<Duration> {
        self.inner.lock().as_ref().map(|t| t.stored_at.elapsed())
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }
}

impl<T: Clone> Default for TimedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct BoundedInner<K, V> {
    entries: HashMap<K, Timed<V>>,
    /// Insertion order; front is the eviction candidate.
    order: VecDeque<K>,
}

/// Keyed cache bounded by entry count. Eviction is oldest-inserted
/// first; expired entries are removed on lookup.
pub struct BoundedCache<K, V> {
    inner: Mutex<BoundedInner<K, V>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BoundedInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Fresh value for `key`, or nothing. Expired entries are dropped.
    pub fn lookup(&self, key: &K, ttl: Duration) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => return None,
        }
        inner.entries.remove(key);
        inner.order.retain(|k| k != key);
        None
    }

    /// Store `value`, evicting the oldest-inserted entry at capacity.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            // refresh in place; insertion order is unchanged
            inner.entries.insert(key, Timed::new(value));
            return;
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, Timed::new(value));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

/// Monotonic cache counters, mirrored to the metrics exporter.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    degraded_hits: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_cache_hits_total").increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_cache_misses_total").increment(1);
    }

    pub fn record_degraded(&self) {
        self.degraded_hits.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_cache_degraded_hits_total").increment(1);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn degraded_hits(&self) -> u64 {
        self.degraded_hits.load(Ordering::Relaxed)
    }
}

/// All cached upstream state; one lock per structure.
pub struct ChainCache {
    pub head: TimedSlot<Value>,
    pub witnesses: TimedSlot<Value>,
    pub headers: BoundedCache<u64, Value>,
    pub blocks: BoundedCache<u64, Value>,
    /// Keyed by (height, only_virtual).
    pub ops: BoundedCache<(u64, bool), Value>,
    pub stats: CacheStats,
}

impl ChainCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: TimedSlot::new(),
            witnesses: TimedSlot::new(),
            headers: BoundedCache::new(capacity),
            blocks: BoundedCache::new(capacity),
            ops: BoundedCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    /// Drop every slot and map. Used after the pool switches endpoints,
    /// since endpoints may disagree on not-yet-irreversible heights.
    pub fn clear_all(&self) {
        self.head.clear();
        self.witnesses.clear();
        self.headers.clear();
        self.blocks.clear();
        self.ops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slot_serves_fresh_and_stale_separately() {
        let slot = TimedSlot::new();
        assert!(slot.get(Duration::from_secs(3)).is_none());
        assert!(slot.get_stale().is_none());

        slot.put(json!({ "h": 1 }));
        assert_eq!(slot.get(Duration::from_secs(3)), Some(json!({ "h": 1 })));
        std::thread::sleep(Duration::from_millis(5));
        assert!(slot.get(Duration::ZERO).is_none());
        assert_eq!(slot.get_stale(), Some(json!({ "h": 1 })));

        slot.clear();
        assert!(slot.get_stale().is_none());
    }

    #[test]
    fn bounded_map_evicts_oldest_inserted() {
        let cache: BoundedCache<u64, Value> = BoundedCache::new(3);
        let ttl = Duration::from_secs(60);
        for h in 1..=3u64 {
            cache.insert(h, json!(h));
        }
        assert_eq!(cache.len(), 3);

        cache.insert(4, json!(4));
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup(&1, ttl).is_none());
        assert_eq!(cache.lookup(&2, ttl), Some(json!(2)));
        assert_eq!(cache.lookup(&4, ttl), Some(json!(4)));
    }

    #[test]
    fn bounded_map_never_exceeds_capacity() {
        let cache: BoundedCache<u64, Value> = BoundedCache::new(5);
        for h in 0..50u64 {
            cache.insert(h, json!(h));
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn refreshing_an_existing_key_keeps_size_and_order() {
        let cache: BoundedCache<u64, Value> = BoundedCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.insert(1, json!("a"));
        cache.insert(2, json!("b"));
        cache.insert(1, json!("a2"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&1, ttl), Some(json!("a2")));

        // key 1 is still the oldest insertion, so it is evicted first
        cache.insert(3, json!("c"));
        assert!(cache.lookup(&1, ttl).is_none());
        assert_eq!(cache.lookup(&2, ttl), Some(json!("b")));
    }

    #[test]
    fn expired_entries_are_removed_on_lookup() {
        let cache: BoundedCache<u64, Value> = BoundedCache::new(3);
        cache.insert(1, json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup(&1, Duration::ZERO).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn clear_all_empties_every_layer() {
        let cache = ChainCache::new(10);
        cache.head.put(json!({ "h": 1 }));
        cache.witnesses.put(json!(["w1"]));
        cache.headers.insert(1, json!({}));
        cache.blocks.insert(1, json!({}));
        cache.ops.insert((1, false), json!([]));

        cache.clear_all();
        assert!(cache.head.get_stale().is_none());
        assert!(cache.witnesses.get_stale().is_none());
        assert!(cache.headers.is_empty());
        assert!(cache.blocks.is_empty());
        assert!(cache.ops.is_empty());
    }
}
