//! Sharded TTL cache for fused query results.
//!
//! Keys hash to one of a fixed number of shards, each behind its own
//! `RwLock`, so lookups of unrelated queries do not contend. Expiry is lazy:
//! an expired entry reads as absent and is removed by the next write to its
//! shard or by [`ResultCache::purge_expired`].
//!
//! Every [`ResultCache::clear`] advances an epoch. A writer that read the
//! epoch before computing its value stores it with
//! [`ResultCache::put_if_current`], which refuses the value once the cache
//! has been cleared in between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::RandomState;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{PilumError, Result};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time to live of an entry, measured from insertion.
    pub ttl_secs: u64,

    /// Number of independently locked shards.
    pub shards: usize,

    /// Upper bound on live entries across all shards.
    pub max_entries: usize,

    /// Interval of the background sweep; 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_secs: 15 * 60,
            shards: 16,
            max_entries: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(PilumError::invalid_config(
                "cache.shards must be greater than 0",
            ));
        }
        if self.max_entries == 0 {
            return Err(PilumError::invalid_config(
                "cache.max_entries must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Live entries dropped to stay under `max_entries`.
    pub evictions: u64,
    /// Expired entries removed.
    pub expirations: u64,
    /// Values refused because the cache was cleared while they were computed.
    pub stale_rejections: u64,
    /// Entries currently stored, including expired ones not yet removed.
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

type Shard<V> = RwLock<HashMap<String, Entry<V>, RandomState>>;

/// A concurrent, TTL-bounded map from normalized query text to results.
#[derive(Debug)]
pub struct ResultCache<V> {
    shards: Vec<Shard<V>>,
    hasher: RandomState,
    ttl: Duration,
    shard_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    stale_rejections: AtomicU64,
    epoch: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        let shard_count = config.shards.max(1);
        let shard_capacity = config.max_entries.div_ceil(shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_hasher(RandomState::new())))
            .collect();

        ResultCache {
            shards,
            hasher: RandomState::new(),
            ttl: config.ttl(),
            shard_capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            stale_rejections: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &str) -> &Shard<V> {
        let index = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let shard = self.shard(key).read();
        match shard.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of times the cache has been cleared.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Insert or replace an entry. The TTL restarts on replacement.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut shard = self.shard(&key).write();
        self.insert(&mut shard, key, value);
    }

    /// Insert or replace an entry unless the cache was cleared after
    /// `epoch` was read. Returns whether the value was stored.
    pub fn put_if_current(&self, key: impl Into<String>, value: V, epoch: u64) -> bool {
        let key = key.into();
        let mut shard = self.shard(&key).write();
        // Checked under the shard lock: a concurrent clear either sees this
        // entry and drops it, or has already advanced the epoch.
        if self.epoch.load(Ordering::Acquire) != epoch {
            self.stale_rejections.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.insert(&mut shard, key, value);
        true
    }

    fn insert(&self, shard: &mut HashMap<String, Entry<V>, RandomState>, key: String, value: V) {
        let now = Instant::now();
        if !shard.contains_key(&key) && shard.len() >= self.shard_capacity {
            let before = shard.len();
            shard.retain(|_, entry| !self.is_expired(entry, now));
            self.expirations
                .fetch_add((before - shard.len()) as u64, Ordering::Relaxed);

            if shard.len() >= self.shard_capacity {
                let oldest = shard
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    shard.remove(&oldest);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        shard.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    /// Remove every entry and advance the epoch.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for shard in &self.shards {
            shard.write().clear();
        }
        debug!("Result cache cleared");
    }

    /// Remove expired entries from every shard and return how many were
    /// dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|_, entry| !self.is_expired(entry, now));
            removed += before - shard.len();
        }
        self.expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            stale_rejections: self.stale_rejections.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
