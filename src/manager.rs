use {
    crate::{
        CallerId, LockError, Result,
        entry::{Entry, WaitFailure},
        shards::Shards,
        table::{EntryTable, ShardedTable},
        transaction::Transaction,
    },
    opera::{PhantomNotSend, PhantomNotSync},
    parking_lot::Mutex,
    run_on_drop::on_drop,
    static_assertions::{assert_impl_all, assert_not_impl_any},
    std::{
        fmt::{Debug, Formatter},
        hash::Hash,
        sync::Arc,
        time::{Duration, Instant},
    },
};


/// A lock manager that hands out exclusive, re-entrant locks on keys.
///
/// The manager behaves like row-level locking in a database: instead of protecting a
/// whole data structure, callers lock the keys of the entities they are about to touch.
/// At most one thread holds a key at a time, threads working on different keys do not
/// block each other, and a thread may lock a key it already holds.
///
/// Before a thread blocks on a key, the manager checks whether the holder of that key is
/// itself blocked on a key held by the thread. Such a two-party deadlock is reported as
/// [`LockError::Deadlock`] instead of blocking forever. Longer cycles are not detected.
///
/// The key map is provided by the table `T`. The default [`ShardedTable`] locks keys
/// independently. See [`GlobalLockManager`](crate::GlobalLockManager) for a manager that
/// can additionally lock every key at once.
///
/// # Example
///
/// ```
/// use std::thread;
/// use entity_lock::LockManager;
///
/// let manager = LockManager::new();
/// manager.lock(&"alice").unwrap();
/// assert!(manager.is_locked_by_current_thread(&"alice"));
///
/// thread::scope(|scope| {
///     scope.spawn(|| {
///         assert!(!manager.is_locked_by_current_thread(&"alice"));
///         // Other keys are not affected.
///         manager.for_lock(&"bob", || ()).unwrap();
///     });
/// });
///
/// manager.unlock(&"alice").unwrap();
/// assert_eq!(manager.entry_count(), 0);
/// ```
pub struct LockManager<K, T = ShardedTable<K>> {
    pub(crate) table: T,
    pub(crate) transactions: Shards<CallerId, Arc<Transaction<K>>>,
    // Serializes deadlock checks with registrations of waiters.
    detector: Mutex<()>,
}

/// A locked key.
///
/// This object is created by calling [`LockManager::guard`] or
/// [`LockManager::try_guard`]. Dropping it unlocks one level of the key.
///
/// Locks are owned by threads, so a [`KeyGuard`] can neither be sent to nor shared with
/// other threads.
///
/// # Example
///
/// ```
/// use entity_lock::LockManager;
///
/// let manager = LockManager::new();
/// {
///     let guard = manager.guard(&7).unwrap();
///     assert_eq!(*guard.key(), 7);
///     assert!(manager.is_locked_by_current_thread(&7));
/// }
/// assert!(!manager.is_locked_by_current_thread(&7));
/// ```
pub struct KeyGuard<'a, K, T = ShardedTable<K>>
where
    K: Eq + Hash + Clone + Debug,
    T: EntryTable<K>,
{
    manager: &'a LockManager<K, T>,
    key: K,
    entry: Arc<Entry>,
    txn: Arc<Transaction<K>>,
    _phantom_not_send: PhantomNotSend,
    _phantom_not_sync: PhantomNotSync,
}

assert_impl_all!(LockManager<u64>: Send, Sync);
assert_not_impl_any!(KeyGuard<'_, u64>: Sync, Send);

#[inline]
fn deadline_after(timeout: Duration) -> Option<Instant> {
    // A timeout too large to be represented is as good as no timeout.
    Instant::now().checked_add(timeout)
}

impl<K> LockManager<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    /// Creates a manager that locks keys independently.
    pub fn new() -> Self {
        Self::with_table(ShardedTable::new())
    }
}

impl<K> Default for LockManager<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> LockManager<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: EntryTable<K>,
{
    /// Creates a manager on top of the given table.
    pub fn with_table(table: T) -> Self {
        Self {
            table,
            transactions: Shards::default(),
            detector: Mutex::new(()),
        }
    }

    /// Acquires `key`.
    ///
    /// If the key is held by another thread, this function blocks until it is able to
    /// acquire the key. If the current thread already holds the key, the function returns
    /// immediately. Every successful call must be matched by a call to
    /// [`LockManager::unlock`].
    ///
    /// # Errors
    ///
    /// - [`LockError::Deadlock`] if the holder of the key is blocked on a key held by the
    ///   current thread.
    /// - [`LockError::Interrupted`] if the wait is cancelled with
    ///   [`LockManager::interrupt`].
    #[inline]
    pub fn lock(&self, key: &K) -> Result<()> {
        self.acquire(key, None).map(drop)
    }

    /// Attempts to acquire `key` until a timeout has expired.
    ///
    /// Returns `Ok(false)` if the key could not be acquired in time. A zero timeout turns
    /// this into a non-blocking attempt.
    ///
    /// # Errors
    ///
    /// Same as [`LockManager::lock`].
    ///
    /// # Example
    ///
    /// ```
    /// use std::thread;
    /// use std::time::Duration;
    /// use entity_lock::LockManager;
    ///
    /// let manager = LockManager::new();
    /// manager.lock(&1).unwrap();
    /// thread::scope(|scope| {
    ///     scope.spawn(|| {
    ///         let locked = manager.try_lock(&1, Duration::from_millis(50)).unwrap();
    ///         assert!(!locked);
    ///     });
    /// });
    /// manager.unlock(&1).unwrap();
    /// ```
    pub fn try_lock(&self, key: &K, timeout: Duration) -> Result<bool> {
        match self.acquire(key, deadline_after(timeout)) {
            Ok(_) => Ok(true),
            Err(LockError::Timeout { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Releases one level of ownership of `key`.
    ///
    /// The key becomes available to other threads once it has been unlocked as often as
    /// it was locked.
    ///
    /// # Errors
    ///
    /// - [`LockError::UnheldKey`] if nobody holds the key.
    /// - [`LockError::NotOwner`] if the key is held by another thread.
    pub fn unlock(&self, key: &K) -> Result<()> {
        let caller = CallerId::current();
        let entry = self
            .table
            .find(key)
            .ok_or_else(|| LockError::unheld_key(key))?;
        let txn = self
            .transactions
            .get(&caller)
            .ok_or_else(|| LockError::not_owner(key, caller))?;
        self.release(&txn, key, &entry)
    }

    /// Returns whether the current thread holds `key`.
    ///
    /// This function does not block.
    #[inline]
    pub fn is_locked_by_current_thread(&self, key: &K) -> bool {
        self.table
            .find(key)
            .is_some_and(|entry| entry.is_held_by(CallerId::current()))
    }

    /// Acquires `key` and returns a guard that unlocks it when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`LockManager::lock`].
    #[inline]
    pub fn guard(&self, key: &K) -> Result<KeyGuard<'_, K, T>> {
        self.guard_until(key, None)
    }

    /// Attempts to acquire `key` until a timeout has expired and returns a guard that
    /// unlocks it when dropped.
    ///
    /// Returns `Ok(None)` if the key could not be acquired in time.
    ///
    /// # Errors
    ///
    /// Same as [`LockManager::lock`].
    pub fn try_guard(&self, key: &K, timeout: Duration) -> Result<Option<KeyGuard<'_, K, T>>> {
        match self.guard_until(key, deadline_after(timeout)) {
            Ok(guard) => Ok(Some(guard)),
            Err(LockError::Timeout { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn guard_until(&self, key: &K, deadline: Option<Instant>) -> Result<KeyGuard<'_, K, T>> {
        let (txn, entry) = self.acquire(key, deadline)?;
        Ok(KeyGuard {
            manager: self,
            key: key.clone(),
            entry,
            txn,
            _phantom_not_send: Default::default(),
            _phantom_not_sync: Default::default(),
        })
    }

    /// Runs `body` while holding `key`.
    ///
    /// The key is unlocked when `body` returns or panics.
    ///
    /// # Errors
    ///
    /// Same as [`LockManager::lock`]. `body` is not run if the key cannot be acquired.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
    /// use std::thread;
    /// use entity_lock::LockManager;
    ///
    /// let manager = LockManager::new();
    /// let balance = AtomicU64::new(0);
    /// thread::scope(|scope| {
    ///     for _ in 0..4 {
    ///         scope.spawn(|| {
    ///             manager
    ///                 .for_lock(&"account", || {
    ///                     let current = balance.load(Relaxed);
    ///                     balance.store(current + 10, Relaxed);
    ///                 })
    ///                 .unwrap();
    ///         });
    ///     }
    /// });
    /// assert_eq!(balance.load(Relaxed), 40);
    /// ```
    pub fn for_lock<R>(&self, key: &K, body: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.guard(key)?;
        Ok(body())
    }

    /// Runs `body` while holding `key`, waiting at most `timeout` for the key.
    ///
    /// The key is unlocked when `body` returns or panics.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] if the key could not be acquired in time, otherwise the same
    /// as [`LockManager::lock`].
    pub fn for_lock_timeout<R>(
        &self,
        key: &K,
        timeout: Duration,
        body: impl FnOnce() -> R,
    ) -> Result<R> {
        let _guard = self.guard_until(key, deadline_after(timeout))?;
        Ok(body())
    }

    /// Cancels the blocking wait of `caller`.
    ///
    /// The waiting operation of `caller` fails with [`LockError::Interrupted`]. If
    /// `caller` is not blocked right now, its next blocking wait fails instead, but only
    /// as long as `caller` keeps holding or waiting for a key. A request that is still
    /// pending when `caller` unlocks its last key is discarded.
    ///
    /// Returns `false` if `caller` neither holds nor waits for any key, in which case the
    /// request is dropped right away.
    pub fn interrupt(&self, caller: CallerId) -> bool {
        let Some(txn) = self.transactions.get(&caller) else {
            return false;
        };
        tracing::debug!(caller = %caller, "interrupting caller");
        txn.interrupt();
        if let Some(entry) = txn.waiting().and_then(|key| self.table.find(&key)) {
            entry.wake_all();
        }
        self.table.wake();
        true
    }

    /// Returns the number of keys that are currently held or waited for.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.table.len()
    }

    /// Returns the transaction of `caller`, creating it if necessary.
    pub(crate) fn transaction(&self, caller: CallerId) -> Arc<Transaction<K>> {
        self.transactions.with(&caller, |txns| {
            txns.entry(caller)
                .or_insert_with(|| Arc::new(Transaction::new(caller)))
                .clone()
        })
    }

    /// Removes the transaction if it holds nothing.
    ///
    /// Must only be called by the owner of the transaction.
    pub(crate) fn retire_if_idle(&self, txn: &Transaction<K>) {
        if txn.is_idle() {
            let caller = txn.caller();
            self.transactions.with(&caller, |txns| txns.remove(&caller));
        }
    }

    /// Returns another caller blocked on a key held by `txn`, together with that key.
    ///
    /// Runs under the same lock as the deadlock check of [`LockManager::lock`], so a
    /// waiter either shows up here or notices the claim of `txn` itself.
    pub(crate) fn waiter_on_held(&self, txn: &Transaction<K>) -> Option<(K, CallerId)> {
        let _detector = self.detector.lock();
        self.transactions.find_map(|&caller, other| {
            if caller == txn.caller() {
                return None;
            }
            other
                .waiting()
                .filter(|key| txn.holds(key))
                .map(|key| (key, caller))
        })
    }

    fn acquire(
        &self,
        key: &K,
        deadline: Option<Instant>,
    ) -> Result<(Arc<Transaction<K>>, Arc<Entry>)> {
        let txn = self.transaction(CallerId::current());
        let res = self.table.acquire(key, &txn, deadline).and_then(|entry| {
            match self.hold(&txn, key, &entry, deadline) {
                Ok(()) => Ok(entry),
                Err(err) => {
                    self.table.release(key);
                    Err(err)
                }
            }
        });
        match res {
            Ok(entry) => Ok((txn, entry)),
            Err(err) => {
                self.retire_if_idle(&txn);
                Err(err)
            }
        }
    }

    fn hold(
        &self,
        txn: &Transaction<K>,
        key: &K,
        entry: &Entry,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let caller = txn.caller();
        if let Err(holder) = entry.try_acquire(caller) {
            tracing::debug!(caller = %caller, holder = %holder, key = ?key, "key is contended");
            self.enter_wait(txn, key, entry)?;
            let _waiting = on_drop(|| txn.set_waiting(None));
            entry
                .acquire_until(caller, deadline, || txn.take_interrupt())
                .map_err(|failure| match failure {
                    WaitFailure::TimedOut => {
                        tracing::debug!(caller = %caller, key = ?key, "timed out");
                        LockError::timeout(key)
                    }
                    WaitFailure::Interrupted => {
                        tracing::debug!(caller = %caller, key = ?key, "interrupted");
                        LockError::Interrupted { caller }
                    }
                })?;
        }
        txn.hold(key.clone());
        tracing::trace!(caller = %caller, key = ?key, "locked");
        Ok(())
    }

    /// Registers `txn` as waiting for `key` unless that would close a wait cycle.
    fn enter_wait(&self, txn: &Transaction<K>, key: &K, entry: &Entry) -> Result<()> {
        let caller = txn.caller();
        let _detector = self.detector.lock();
        if let Some(holder) = entry.holder().filter(|&holder| holder != caller) {
            // A claimant of the global lock waits for our pin to go away.
            let cycle = self.table.is_claimed_by(holder)
                || self
                    .transactions
                    .get(&holder)
                    .is_some_and(|other| other.waits_for(|awaited| txn.holds(awaited)));
            if cycle {
                tracing::warn!(caller = %caller, holder = %holder, key = ?key, "deadlock detected");
                return Err(LockError::deadlock(key, caller, holder));
            }
        }
        txn.set_waiting(Some(key.clone()));
        Ok(())
    }

    fn release(&self, txn: &Transaction<K>, key: &K, entry: &Entry) -> Result<()> {
        let caller = txn.caller();
        let res = match entry.release(caller) {
            Ok(freed) => {
                if freed {
                    txn.unhold(key);
                }
                self.table.release(key);
                tracing::trace!(caller = %caller, key = ?key, freed, "unlocked");
                Ok(())
            }
            Err(_) => Err(LockError::not_owner(key, caller)),
        };
        self.retire_if_idle(txn);
        res
    }
}

impl<K, T> Debug for LockManager<K, T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<K, T> KeyGuard<'_, K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: EntryTable<K>,
{
    /// Returns the key held by this guard.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, T> Drop for KeyGuard<'_, K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: EntryTable<K>,
{
    fn drop(&mut self) {
        if let Err(err) = self.manager.release(&self.txn, &self.key, &self.entry) {
            tracing::error!(key = ?self.key, %err, "could not release key guard");
        }
    }
}

impl<K, T> Debug for KeyGuard<'_, K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: EntryTable<K>,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard")
            .field("key", &self.key)
            .field("caller", &self.txn.caller())
            .finish_non_exhaustive()
    }
}
