use {
    crate::{
        CallerId, Result,
        entry::Entry,
        shards::{DEFAULT_SHARDS, Shards},
        transaction::Transaction,
    },
    std::{
        collections::HashMap,
        fmt::{Debug, Formatter},
        hash::Hash,
        sync::Arc,
        time::Instant,
    },
};

#[cfg(test)]
mod tests;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// The map from keys to their lock records.
///
/// A table decides how entries are created, found and disposed of. The
/// [`LockManager`](crate::LockManager) runs the same locking algorithm on top of every
/// table. Two tables exist:
///
/// - [`ShardedTable`] locks each key independently.
/// - [`GlobalTable`](crate::GlobalTable) serializes all bookkeeping behind one mutex so
///   that it can offer a global lock.
///
/// This trait is sealed.
pub trait EntryTable<K>: sealed::Sealed + Send + Sync {
    /// Returns the entry of `key`, creating it if necessary, and pins it.
    ///
    /// A pinned entry stays in the table, and is returned to every caller asking for the
    /// same key, until each pin has been given back with [`EntryTable::release`].
    #[doc(hidden)]
    fn acquire(
        &self,
        key: &K,
        txn: &Transaction<K>,
        deadline: Option<Instant>,
    ) -> Result<Arc<Entry>>;

    /// Returns the entry of `key` without pinning it.
    #[doc(hidden)]
    fn find(&self, key: &K) -> Option<Arc<Entry>>;

    /// Gives back one pin of the entry of `key`. The last pin removes the entry.
    #[doc(hidden)]
    fn release(&self, key: &K);

    /// Returns the number of entries.
    fn len(&self) -> usize;

    /// Returns whether `caller` is waiting for the other callers to give up their
    /// entries.
    #[doc(hidden)]
    fn is_claimed_by(&self, _caller: CallerId) -> bool {
        false
    }

    /// Wakes callers blocked inside the table so that they re-check their interruption
    /// flags.
    #[doc(hidden)]
    fn wake(&self) {}
}

/// A pinned entry.
pub(crate) struct Slot {
    pub(crate) entry: Arc<Entry>,
    pins: usize,
}

impl Slot {
    /// Returns whether every pin of this slot belongs to an acquisition by `caller`.
    ///
    /// Each acquisition pins the entry once, so this holds exactly when nobody else is
    /// holding or waiting for the key.
    pub(crate) fn is_pinned_only_by(&self, caller: CallerId) -> bool {
        self.entry.depth_of(caller) == self.pins as u64
    }
}

/// Returns the entry of `key` in `slots`, creating it if necessary, and pins it.
pub(crate) fn pin<K>(slots: &mut HashMap<K, Slot>, key: &K) -> Arc<Entry>
where
    K: Eq + Hash + Clone + Debug,
{
    if let Some(slot) = slots.get_mut(key) {
        slot.pins += 1;
        return slot.entry.clone();
    }
    tracing::trace!(key = ?key, "creating entry");
    let entry = Arc::new(Entry::new());
    slots.insert(
        key.clone(),
        Slot {
            entry: entry.clone(),
            pins: 1,
        },
    );
    entry
}

/// Gives back one pin of the entry of `key`. Returns whether the entry was removed.
pub(crate) fn unpin<K>(slots: &mut HashMap<K, Slot>, key: &K) -> bool
where
    K: Eq + Hash + Debug,
{
    let Some(slot) = slots.get_mut(key) else {
        debug_assert!(false, "unpinning an entry that does not exist");
        return false;
    };
    slot.pins -= 1;
    if slot.pins > 0 {
        return false;
    }
    slots.remove(key);
    tracing::trace!(key = ?key, "disposed of entry");
    true
}

/// A table that locks each key independently.
///
/// Keys are spread over a fixed number of shards. Creating, pinning and disposing of an
/// entry happens atomically under the lock of the key's shard, so callers of different
/// keys only contend if their keys share a shard, and only for the duration of the
/// bookkeeping.
///
/// # Example
///
/// ```
/// use entity_lock::{LockManager, ShardedTable};
///
/// let manager = LockManager::with_table(ShardedTable::with_shards(8));
/// manager.lock(&"key").unwrap();
/// manager.unlock(&"key").unwrap();
/// ```
pub struct ShardedTable<K> {
    slots: Shards<K, Slot>,
}

impl<K> ShardedTable<K>
where
    K: Eq + Hash,
{
    /// Creates a table with the default number of shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a table with `shards` shards. A value of 0 is treated as 1.
    pub fn with_shards(shards: usize) -> Self {
        Self {
            slots: Shards::new(shards),
        }
    }

    /// Returns the number of shards.
    pub fn shards(&self) -> usize {
        self.slots.shard_count()
    }
}

impl<K> Default for ShardedTable<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> sealed::Sealed for ShardedTable<K> {}

impl<K> EntryTable<K> for ShardedTable<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    fn acquire(
        &self,
        key: &K,
        _txn: &Transaction<K>,
        _deadline: Option<Instant>,
    ) -> Result<Arc<Entry>> {
        Ok(self.slots.with(key, |slots| pin(slots, key)))
    }

    fn find(&self, key: &K) -> Option<Arc<Entry>> {
        self.slots.with(key, |slots| slots.get(key).map(|slot| slot.entry.clone()))
    }

    fn release(&self, key: &K) {
        self.slots.with(key, |slots| unpin(slots, key));
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<K> Debug for ShardedTable<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedTable")
            .field("shards", &self.slots.shard_count())
            .finish_non_exhaustive()
    }
}
