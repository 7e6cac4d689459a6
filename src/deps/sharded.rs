//! Lock-sharded hash map.
//!
//! Render workers record edges concurrently. Two workers recording edges to
//! the same target key contend on one shard only, never on the whole index.

use parking_lot::RwLock;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::hash::{BuildHasher, Hash};

/// Default shard count. Must be a power of two.
pub const DEFAULT_SHARDS: usize = 16;

pub struct Sharded<K, V> {
    shards: Box<[RwLock<FxHashMap<K, V>>]>,
}

impl<K: Hash + Eq, V> Sharded<K, V> {
    pub fn new(shards: usize) -> Self {
        debug_assert!(shards.is_power_of_two());
        Self {
            shards: (0..shards).map(|_| RwLock::new(FxHashMap::default())).collect(),
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &RwLock<FxHashMap<K, V>> {
        let hash = FxBuildHasher.hash_one(key) as usize;
        &self.shards[hash & (self.shards.len() - 1)]
    }

    /// Run `f` with read access to the shard owning `key`.
    pub fn read<R>(&self, key: &K, f: impl FnOnce(&FxHashMap<K, V>) -> R) -> R {
        f(&self.shard(key).read())
    }

    /// Run `f` with write access to the shard owning `key`.
    pub fn write<R>(&self, key: &K, f: impl FnOnce(&mut FxHashMap<K, V>) -> R) -> R {
        f(&mut self.shard(key).write())
    }

    /// Visit every entry, one shard at a time.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in &self.shards {
            for (k, v) in shard.read().iter() {
                f(k, v);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

impl<K: Hash + Eq, V> Default for Sharded<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}
