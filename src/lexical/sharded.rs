//! Ordered maps split into `Arc`-shared shards.
//!
//! Cloning a [`ShardedMap`] copies one pointer per shard. A write copies only
//! the shard it lands in, and only while another version still shares it, so
//! publishing a new index version after a small insert costs a fraction of
//! the corpus instead of all of it.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Number of shards per map. Part of the snapshot format: a key's shard is
/// fixed by a stable hash of its text.
pub const SHARD_COUNT: usize = 64;

fn shard_of(key: &str) -> usize {
    crc32fast::hash(key.as_bytes()) as usize % SHARD_COUNT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"
))]
pub struct ShardedMap<K, V> {
    shards: Vec<Arc<BTreeMap<K, V>>>,
}

impl<K, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        ShardedMap {
            shards: (0..SHARD_COUNT).map(|_| Arc::new(BTreeMap::new())).collect(),
        }
    }
}

impl<K, V> ShardedMap<K, V>
where
    K: Borrow<str> + Ord + Clone,
    V: Clone,
{
    pub fn get(&self, key: &str) -> Option<&V> {
        self.shards.get(shard_of(key))?.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Entry for `key` in a shard owned by this map alone.
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V> {
        let shard = &mut self.shards[shard_of(key.borrow())];
        Arc::make_mut(shard).entry(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let shard = &mut self.shards[shard_of(key.borrow())];
        Arc::make_mut(shard).insert(key, value)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.is_empty())
    }

    /// Entries shard by shard; ordered within a shard only.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.shards.iter().flat_map(|shard| shard.iter())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.shards.iter().flat_map(|shard| shard.values())
    }

    /// Whether the shard layout matches [`SHARD_COUNT`] and every key sits in
    /// the shard its hash selects. Decoded maps must pass this before use.
    pub fn is_well_formed(&self) -> bool {
        self.shards.len() == SHARD_COUNT
            && self.shards.iter().enumerate().all(|(position, shard)| {
                shard.keys().all(|key| shard_of(key.borrow()) == position)
            })
    }

    /// Whether both maps hold the same shard for `key`, without a copy.
    #[cfg(test)]
    pub fn shares_shard_with(&self, other: &Self, key: &str) -> bool {
        let position = shard_of(key);
        Arc::ptr_eq(&self.shards[position], &other.shards[position])
    }
}
