use {
    crate::CallerId,
    parking_lot::Mutex,
    std::{
        collections::HashSet,
        fmt::{Debug, Formatter},
        hash::Hash,
        sync::atomic::{AtomicBool, Ordering::Relaxed},
    },
};


/// The locking state of one caller.
///
/// A transaction records which keys its caller holds and which key it is blocked on.
/// Re-entrant acquisitions are counted by the entries, so each key appears at most once
/// in the held set.
///
/// Only the owning caller adds or removes keys. Other callers read the state during
/// deadlock detection, global lock acquisition and interruption.
pub struct Transaction<K> {
    caller: CallerId,
    held: Mutex<HashSet<K>>,
    waiting: Mutex<Option<K>>,
    interrupted: AtomicBool,
}

impl<K> Transaction<K>
where
    K: Eq + Hash,
{
    pub(crate) fn new(caller: CallerId) -> Self {
        Self {
            caller,
            held: Mutex::new(HashSet::new()),
            waiting: Mutex::new(None),
            interrupted: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn caller(&self) -> CallerId {
        self.caller
    }

    pub(crate) fn hold(&self, key: K) {
        self.held.lock().insert(key);
    }

    pub(crate) fn unhold(&self, key: &K) {
        let removed = self.held.lock().remove(key);
        debug_assert!(removed);
    }

    #[inline]
    pub(crate) fn holds(&self, key: &K) -> bool {
        self.held.lock().contains(key)
    }

    /// Returns whether the caller holds nothing. Such a transaction can be retired.
    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        self.held.lock().is_empty()
    }

    pub(crate) fn set_waiting(&self, key: Option<K>) {
        *self.waiting.lock() = key;
    }

    /// Returns whether the caller is blocked on a key that satisfies `f`.
    ///
    /// `f` runs while the waiting slot is locked.
    pub(crate) fn waits_for(&self, f: impl FnOnce(&K) -> bool) -> bool {
        self.waiting.lock().as_ref().is_some_and(f)
    }

    pub(crate) fn waiting(&self) -> Option<K>
    where
        K: Clone,
    {
        self.waiting.lock().clone()
    }

    /// Requests that the current or next blocking wait of the caller be cancelled.
    pub(crate) fn interrupt(&self) {
        self.interrupted.store(true, Relaxed);
    }

    /// Consumes a pending interruption request.
    #[inline]
    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Relaxed)
    }
}

impl<K> Debug for Transaction<K>
where
    K: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("caller", &self.caller)
            .field("held", &*self.held.lock())
            .field("waiting", &*self.waiting.lock())
            .finish_non_exhaustive()
    }
}
