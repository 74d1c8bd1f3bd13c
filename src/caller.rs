use std::{
    cell::Cell,
    fmt::{Display, Formatter},
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

#[cfg(test)]
mod tests;

/// The identity of a thread calling into a lock manager.
///
/// Every lock is owned by a caller. A thread is assigned its ID the first time it asks for
/// one and keeps it for the rest of its life.
///
/// IDs are drawn from a process-wide counter and are never reused. In particular, if a
/// thread terminates while still owning locks, a thread started later does not inherit
/// those locks.
///
/// # Example
///
/// ```
/// use std::thread;
/// use entity_lock::CallerId;
///
/// let id = CallerId::current();
/// assert_eq!(id, CallerId::current());
/// let other = thread::spawn(CallerId::current).join().unwrap();
/// assert_ne!(id, other);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(NonZeroU64);

impl CallerId {
    /// Returns the ID of the current thread.
    #[inline]
    pub fn current() -> Self {
        thread_local!(static CALLER_ID: Cell<Option<CallerId>> = const { Cell::new(None) });
        CALLER_ID.with(|slot| match slot.get() {
            Some(id) => id,
            None => {
                let id = Self::next();
                slot.set(Some(id));
                id
            }
        })
    }

    #[cold]
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        // The counter starts at 1 and would need 2^64 threads to wrap around.
        let id = NEXT.fetch_add(1, Relaxed);
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    /// Returns the numeric value of this ID. The value is never 0.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl Display for CallerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "caller#{}", self.0)
    }
}
