//! Metadata Cache
//!
//! TTL + LRU cache for expensive schema/model descriptions.
//!
//! - Entries expire `ttl` after insertion; an expired entry is removed on read.
//! - Frequently read entries are promoted to a longer "hot" TTL.
//! - Inserting a new key at capacity evicts the least recently accessed entry.
//! - Expiry sweeps are rate-limited to one per cleanup interval.
//!
//! All state (entries, counters, sweep timestamp) lives behind one mutex so
//! promotion, eviction and insertion are atomic with respect to concurrent
//! requests. The lock is never held across an `.await`.

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, MAX_CACHE_DURATION_SECS};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// One cached value plus its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub cached_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Valid iff `now - cached_at < ttl`
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now - self.cached_at < self.ttl
    }
}

/// Cache performance counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
    /// Percentage of reads served from the cache, rounded to two decimals
    pub hit_rate: f64,
    pub last_cleanup: DateTime<Utc>,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    refreshes: u64,
    evictions: u64,
    expirations: u64,
    last_cleanup: DateTime<Utc>,
}

pub struct MetadataCache<V> {
    name: String,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                refreshes: 0,
                evictions: 0,
                expirations: 0,
                last_cleanup: now,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // A panic while holding the lock cannot leave a half-applied update:
        // every mutation below completes before the guard drops.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn default_ttl(&self) -> Duration {
        bounded_seconds(self.config.default_ttl_secs)
    }

    fn hot_ttl(&self) -> Duration {
        bounded_seconds(self.config.hot_ttl_secs)
    }

    /// Look up a value, doing access bookkeeping on a hit.
    ///
    /// Absent or expired keys count as a miss; expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let hot_ttl = self.hot_ttl();
        let mut guard = self.lock();
        let state = &mut *guard;

        let valid = match state.entries.get(key) {
            Some(entry) => entry.is_valid(now),
            None => {
                state.misses += 1;
                return None;
            }
        };

        if !valid {
            state.entries.remove(key);
            state.expirations += 1;
            state.misses += 1;
            debug!("[{}] entry '{}' expired", self.name, key);
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        if entry.access_count > self.config.promotion_threshold && entry.ttl < hot_ttl {
            entry.ttl = hot_ttl;
            debug!(
                "[{}] promoted '{}' to hot TTL after {} accesses",
                self.name, key, entry.access_count
            );
        }
        state.hits += 1;
        Some(entry.value.clone())
    }

    /// Inspect an entry without touching its access bookkeeping or the counters
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.lock().entries.get(key).cloned()
    }

    /// Insert or replace a value.
    ///
    /// Inserting a new key into a full cache first evicts the entry with the
    /// oldest `last_accessed`.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = self.clock.now();
        let ttl = self.default_ttl();
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            if let Some(evicted) = Self::evict_least_recently_used(state) {
                info!("[{}] evicted cache entry: {}", self.name, evicted);
            }
        }

        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                value,
                cached_at: now,
                last_accessed: now,
                access_count: 1,
                ttl,
            },
        );
        state.refreshes += 1;
        debug!("[{}] cached '{}'", self.name, key);
    }

    fn evict_least_recently_used(state: &mut CacheState<V>) -> Option<String> {
        let lru_key = state
            .entries
            .values()
            .min_by(|a, b| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then_with(|| a.cached_at.cmp(&b.cached_at))
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|entry| entry.key.clone())?;
        state.entries.remove(&lru_key);
        state.evictions += 1;
        Some(lru_key)
    }

    /// Remove every expired entry, at most once per cleanup interval.
    ///
    /// Returns the number of entries removed; 0 when the sweep was skipped.
    pub fn invalidate_expired(&self) -> usize {
        let now = self.clock.now();
        let interval = bounded_seconds(self.config.cleanup_interval_secs);
        let mut guard = self.lock();
        let state = &mut *guard;

        if now - state.last_cleanup < interval {
            return 0;
        }

        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|entry| !entry.is_valid(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            state.entries.remove(key);
        }
        state.expirations += expired.len() as u64;
        state.last_cleanup = now;

        if !expired.is_empty() {
            info!("[{}] cleaned up {} expired cache entries", self.name, expired.len());
        }
        expired.len()
    }

    /// Read-through lookup: on a miss, await `fetch` and cache its value.
    ///
    /// A failed fetch is returned to the caller and nothing is written.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.invalidate_expired();

        if let Some(value) = self.get(key) {
            info!("[{}] cache hit for {}", self.name, key);
            return Ok(value);
        }

        info!("[{}] cache miss for {} - fetching fresh data", self.name, key);
        let value = fetch().await?;
        self.put(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let total = state.hits + state.misses;
        let hit_rate = if total > 0 {
            ((state.hits as f64 / total as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            refreshes: state.refreshes,
            evictions: state.evictions,
            expirations: state.expirations,
            size: state.entries.len(),
            capacity: self.config.max_entries,
            hit_rate,
            last_cleanup: state.last_cleanup,
        }
    }
}

fn bounded_seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_CACHE_DURATION_SECS) as i64)
}
