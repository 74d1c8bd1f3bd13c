use {
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        hash::{BuildHasher, Hash, RandomState},
    },
};

#[cfg(test)]
mod tests;

/// The default number of shards of a [`Shards`] map.
pub(crate) const DEFAULT_SHARDS: usize = 64;

/// A hash map split into independently locked shards.
///
/// Each key lives in exactly one shard. All updates of a key run under the lock of its
/// shard, which makes a read-modify-write through [`Shards::with`] atomic with respect to
/// every other access to that key. Keys in different shards never contend.
pub(crate) struct Shards<K, V> {
    hasher: RandomState,
    shards: Box<[Mutex<HashMap<K, V>>]>,
}

impl<K, V> Shards<K, V>
where
    K: Eq + Hash,
{
    /// Creates a map with `count` shards. A count of 0 is treated as 1.
    pub(crate) fn new(count: usize) -> Self {
        Self {
            hasher: RandomState::new(),
            shards: (0..count.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &Mutex<HashMap<K, V>> {
        let hash = self.hasher.hash_one(key);
        &self.shards[(hash % self.shards.len() as u64) as usize]
    }

    /// Runs `f` on the shard that owns `key` while holding the shard lock.
    ///
    /// `f` must only touch `key`. Touching other keys of the same shard is harmless but
    /// gives no atomicity guarantees for them.
    #[inline]
    pub(crate) fn with<R>(&self, key: &K, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        f(&mut self.shard(key).lock())
    }

    #[inline]
    pub(crate) fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).lock().get(key).cloned()
    }

    /// Returns the first non-`None` result of `f` over all entries.
    ///
    /// Shards are locked one after another, so the search does not see a consistent
    /// snapshot of the whole map.
    pub(crate) fn find_map<R>(&self, mut f: impl FnMut(&K, &V) -> Option<R>) -> Option<R> {
        self.shards
            .iter()
            .find_map(|shard| shard.lock().iter().find_map(|(key, value)| f(key, value)))
    }

    /// Returns the number of keys.
    ///
    /// Shards are counted one after another. The result is exact only if the map is not
    /// modified concurrently.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}

impl<K, V> Shards<K, V> {
    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl<K, V> Default for Shards<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}
