use {
    crate::{
        CallerId, LockError, LockManager, Result,
        entry::Entry,
        table::{EntryTable, Slot, pin, sealed, unpin},
        transaction::Transaction,
    },
    parking_lot::{Condvar, Mutex, MutexGuard},
    std::{
        collections::HashMap,
        fmt::{Debug, Formatter},
        hash::Hash,
        ops::Deref,
        sync::Arc,
        time::{Duration, Instant},
    },
};


/// A table whose bookkeeping is serialized by a single mutex.
///
/// Next to the key map, the mutex protects the state of the global lock. This gives the
/// global lock a consistent view of which keys are in use at the cost of making every
/// entry lookup contend on the same mutex. Protected code itself runs outside of the
/// mutex.
///
/// While another caller holds or claims the global lock, pinning an entry blocks until
/// the global lock is released. The holder of the global lock can still lock and unlock
/// keys.
pub struct GlobalTable<K> {
    state: Mutex<State<K>>,
    changed: Condvar,
}

struct State<K> {
    slots: HashMap<K, Slot>,
    // Invariant: holder.is_some() if depth > 0. A holder with depth 0 is a tentative
    // claim of a caller that is waiting for the other callers to drain.
    holder: Option<CallerId>,
    depth: u64,
}

impl<K> State<K> {
    fn is_blocked_for(&self, caller: CallerId) -> bool {
        self.holder.is_some_and(|holder| holder != caller)
    }

    /// Returns whether no caller other than `caller` holds or waits for a key.
    fn is_drained_for(&self, caller: CallerId) -> bool {
        self.slots.values().all(|slot| slot.is_pinned_only_by(caller))
    }
}

impl<K> GlobalTable<K> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                holder: None,
                depth: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Waits until `deadline`. Returns false if the deadline has passed.
    fn wait(&self, state: &mut MutexGuard<'_, State<K>>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) if Instant::now() >= deadline => false,
            Some(deadline) => {
                self.changed.wait_until(state, deadline);
                true
            }
            None => {
                self.changed.wait(state);
                true
            }
        }
    }

    /// Acquires the global lock for the owner of `txn`.
    ///
    /// Returns `Ok(false)` if `deadline` passes first. `txn` must belong to the current
    /// thread.
    ///
    /// `waiter_on_held` returns a caller blocked on one of the keys of `txn`. Such a
    /// caller can never drain, so the claim fails with a deadlock instead.
    fn claim(
        &self,
        txn: &Transaction<K>,
        deadline: Option<Instant>,
        waiter_on_held: impl Fn() -> Option<(K, CallerId)>,
    ) -> Result<bool>
    where
        K: Eq + Hash + Debug,
    {
        let caller = txn.caller();
        let mut state = self.state.lock();
        loop {
            if state.holder.is_none() {
                // Claiming before waiting stops other callers from pinning new entries.
                tracing::debug!(caller = %caller, "claimed global lock");
                state.holder = Some(caller);
            }
            if state.holder == Some(caller) {
                if !state.is_drained_for(caller) {
                    // Only this caller changes its own claim, so it survives the unlock.
                    if let Some((key, waiter)) = MutexGuard::unlocked(&mut state, &waiter_on_held)
                    {
                        self.abandon_claim(&mut state, caller);
                        tracing::warn!(caller = %caller, waiter = %waiter, key = ?key, "deadlock detected");
                        return Err(LockError::deadlock(&key, caller, waiter));
                    }
                }
                if state.is_drained_for(caller) {
                    state.depth += 1;
                    tracing::debug!(caller = %caller, depth = state.depth, "acquired global lock");
                    return Ok(true);
                }
            }
            if txn.take_interrupt() {
                self.abandon_claim(&mut state, caller);
                return Err(LockError::Interrupted { caller });
            }
            if !self.wait(&mut state, deadline) {
                self.abandon_claim(&mut state, caller);
                tracing::debug!(caller = %caller, "timed out waiting for global lock");
                return Ok(false);
            }
        }
    }

    fn abandon_claim(&self, state: &mut State<K>, caller: CallerId) {
        if state.holder == Some(caller) && state.depth == 0 {
            state.holder = None;
            self.changed.notify_all();
        }
    }

    fn unclaim(&self, caller: CallerId) -> Result<()> {
        let mut state = self.state.lock();
        if state.holder.is_none() || state.depth == 0 {
            return Err(LockError::IllegalState("the global lock is not held"));
        }
        if state.holder != Some(caller) {
            return Err(LockError::IllegalState(
                "the global lock is held by another caller",
            ));
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.holder = None;
            self.changed.notify_all();
            tracing::debug!(caller = %caller, "released global lock");
        }
        Ok(())
    }

    fn holder(&self) -> Option<CallerId> {
        self.state.lock().holder
    }

    fn is_held_by(&self, caller: CallerId) -> bool {
        let state = self.state.lock();
        state.holder == Some(caller) && state.depth > 0
    }
}

impl<K> Default for GlobalTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> sealed::Sealed for GlobalTable<K> {}

impl<K> EntryTable<K> for GlobalTable<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    fn acquire(
        &self,
        key: &K,
        txn: &Transaction<K>,
        deadline: Option<Instant>,
    ) -> Result<Arc<Entry>> {
        let caller = txn.caller();
        let mut state = self.state.lock();
        // Keys the caller already holds stay available to it.
        while state.is_blocked_for(caller) && !txn.holds(key) {
            if let Some(holder) = state.holder.filter(|_| !txn.is_idle()) {
                // The claimant waits for the keys of the caller.
                tracing::warn!(caller = %caller, holder = %holder, key = ?key, "deadlock detected");
                return Err(LockError::deadlock(key, caller, holder));
            }
            if txn.take_interrupt() {
                return Err(LockError::Interrupted { caller });
            }
            tracing::trace!(caller = %caller, key = ?key, "waiting for global lock");
            if !self.wait(&mut state, deadline) {
                return Err(LockError::timeout(key));
            }
        }
        Ok(pin(&mut state.slots, key))
    }

    fn find(&self, key: &K) -> Option<Arc<Entry>> {
        self.state
            .lock()
            .slots
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    fn release(&self, key: &K) {
        let mut state = self.state.lock();
        unpin(&mut state.slots, key);
        if state.holder.is_some() {
            // The claimant of the global lock waits for the table to drain.
            self.changed.notify_all();
        }
    }

    fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    fn is_claimed_by(&self, caller: CallerId) -> bool {
        let state = self.state.lock();
        state.holder == Some(caller) && state.depth == 0
    }

    fn wake(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }
}

impl<K> Debug for GlobalTable<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GlobalTable")
            .field("entries", &state.slots.len())
            .field("holder", &state.holder)
            .field("depth", &state.depth)
            .finish()
    }
}

/// A lock manager that can additionally lock all keys at once.
///
/// The global lock is re-entrant and owned by a thread, just like the locks on keys.
/// While a thread holds it, no other thread can lock any key. The holder itself can still
/// lock and unlock keys.
///
/// Acquiring the global lock waits until every other thread has released its keys. The
/// request is registered before waiting, so threads that have not yet locked a key cannot
/// overtake it. A thread that holds keys and asks for another one while the request is
/// pending gets [`LockError::Deadlock`], since the request waits for its keys. This bookkeeping needs a consistent view of all keys, which is why every
/// operation of this manager goes through a single mutex. Use
/// [`LockManager`](crate::LockManager) if the global lock is not needed.
///
/// All per-key operations are available through [`Deref`].
///
/// # Example
///
/// ```
/// use entity_lock::GlobalLockManager;
///
/// let manager = GlobalLockManager::new();
/// manager.lock(&"key").unwrap();
/// // The current thread holds every other key in the table.
/// manager.lock_global().unwrap();
/// assert!(manager.is_global_locked_by_current_thread());
/// manager.unlock_global().unwrap();
/// manager.unlock(&"key").unwrap();
/// ```
pub struct GlobalLockManager<K> {
    manager: LockManager<K, GlobalTable<K>>,
}

impl<K> GlobalLockManager<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    /// Creates a manager with no keys locked.
    pub fn new() -> Self {
        Self {
            manager: LockManager::with_table(GlobalTable::new()),
        }
    }

    /// Acquires the global lock.
    ///
    /// Blocks until no other thread holds or waits for any key and no other thread holds
    /// the global lock.
    ///
    /// # Errors
    ///
    /// - [`LockError::Deadlock`] if another thread is blocked on a key held by the
    ///   current thread. That thread would take the key as soon as it is unlocked, so
    ///   the global lock could never be exclusive.
    /// - [`LockError::Interrupted`] if the wait is cancelled with
    ///   [`LockManager::interrupt`].
    pub fn lock_global(&self) -> Result<()> {
        self.claim(None).map(drop)
    }

    /// Attempts to acquire the global lock until a timeout has expired.
    ///
    /// Returns `Ok(false)` if the global lock could not be acquired in time. A tentative
    /// claim on the global lock is withdrawn in that case.
    ///
    /// # Errors
    ///
    /// Same as [`GlobalLockManager::lock_global`].
    ///
    /// # Example
    ///
    /// ```
    /// use std::thread;
    /// use std::time::Duration;
    /// use entity_lock::GlobalLockManager;
    ///
    /// let manager = GlobalLockManager::new();
    /// manager.lock(&1).unwrap();
    /// thread::scope(|scope| {
    ///     scope.spawn(|| {
    ///         assert!(!manager.try_lock_global(Duration::from_millis(50)).unwrap());
    ///         assert!(!manager.is_global_locked());
    ///     });
    /// });
    /// manager.unlock(&1).unwrap();
    /// ```
    pub fn try_lock_global(&self, timeout: Duration) -> Result<bool> {
        self.claim(Instant::now().checked_add(timeout))
    }

    fn claim(&self, deadline: Option<Instant>) -> Result<bool> {
        let txn = self.manager.transaction(CallerId::current());
        let res = self
            .manager
            .table
            .claim(&txn, deadline, || self.manager.waiter_on_held(&txn));
        self.manager.retire_if_idle(&txn);
        res
    }

    /// Releases one level of the global lock.
    ///
    /// # Errors
    ///
    /// [`LockError::IllegalState`] if the current thread does not hold the global lock.
    pub fn unlock_global(&self) -> Result<()> {
        self.manager.table.unclaim(CallerId::current())
    }

    /// Returns whether any thread holds or is acquiring the global lock.
    ///
    /// This is meant for monitoring, not for synchronization.
    pub fn is_global_locked(&self) -> bool {
        self.manager.table.holder().is_some()
    }

    /// Returns whether the current thread holds the global lock.
    pub fn is_global_locked_by_current_thread(&self) -> bool {
        self.manager.table.is_held_by(CallerId::current())
    }
}

impl<K> Default for GlobalLockManager<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Deref for GlobalLockManager<K> {
    type Target = LockManager<K, GlobalTable<K>>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl<K> Debug for GlobalLockManager<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalLockManager")
            .field("table", &self.manager.table)
            .finish_non_exhaustive()
    }
}
