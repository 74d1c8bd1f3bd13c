use {
    crate::CallerId,
    debug_fn::debug_fn,
    parking_lot::{Condvar, Mutex},
    std::{
        fmt::{Debug, Formatter},
        time::Instant,
    },
};

#[cfg(test)]
mod tests;

/// The lock record of a single key.
///
/// An entry is an exclusive lock that remembers its holder and how often the holder has
/// acquired it. The lock manager decides on its own whether an acquisition is a
/// re-entrant fast path, a failure, or a blocking wait, so the primitive is spelled out
/// as a `{holder, depth}` pair behind a mutex plus a condition variable that is signalled
/// whenever the entry becomes free.
///
/// How many callers reference an entry is not tracked here but by the table that owns
/// the entry.
pub struct Entry {
    hold: Mutex<Hold>,
    released: Condvar,
}

// Invariant: holder.is_some() if and only if depth > 0.
#[derive(Default)]
struct Hold {
    holder: Option<CallerId>,
    depth: u64,
}

/// Why a blocking wait ended without acquiring the entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum WaitFailure {
    TimedOut,
    Interrupted,
}

impl Entry {
    pub(crate) fn new() -> Self {
        Self {
            hold: Mutex::new(Hold::default()),
            released: Condvar::new(),
        }
    }

    /// Returns the caller holding this entry.
    #[inline]
    pub(crate) fn holder(&self) -> Option<CallerId> {
        self.hold.lock().holder
    }

    #[inline]
    pub(crate) fn is_held_by(&self, caller: CallerId) -> bool {
        self.holder() == Some(caller)
    }

    /// Returns how often `caller` has acquired this entry. 0 if it does not hold it.
    pub(crate) fn depth_of(&self, caller: CallerId) -> u64 {
        let hold = self.hold.lock();
        match hold.holder {
            Some(holder) if holder == caller => hold.depth,
            _ => 0,
        }
    }

    /// Acquires this entry without blocking.
    ///
    /// Succeeds if the entry is free or already held by `caller`, in which case the depth
    /// is incremented. Otherwise returns the current holder.
    pub(crate) fn try_acquire(&self, caller: CallerId) -> Result<(), CallerId> {
        let mut hold = self.hold.lock();
        let holder = hold.holder;
        match holder {
            None => {
                hold.holder = Some(caller);
                hold.depth = 1;
                Ok(())
            }
            Some(holder) if holder == caller => {
                hold.depth += 1;
                Ok(())
            }
            Some(holder) => Err(holder),
        }
    }

    /// Blocks until `caller` acquires this entry, `deadline` passes, or `interrupted`
    /// returns true.
    ///
    /// `caller` must not currently hold the entry. `interrupted` is polled with the entry
    /// lock held, before every wait and after every wake-up.
    pub(crate) fn acquire_until(
        &self,
        caller: CallerId,
        deadline: Option<Instant>,
        mut interrupted: impl FnMut() -> bool,
    ) -> Result<(), WaitFailure> {
        let mut hold = self.hold.lock();
        debug_assert_ne!(hold.holder, Some(caller));
        loop {
            let failure = if interrupted() {
                WaitFailure::Interrupted
            } else if hold.holder.is_none() {
                hold.holder = Some(caller);
                hold.depth = 1;
                return Ok(());
            } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                WaitFailure::TimedOut
            } else {
                match deadline {
                    Some(deadline) => {
                        self.released.wait_until(&mut hold, deadline);
                    }
                    None => self.released.wait(&mut hold),
                }
                continue;
            };
            // We may have consumed the wake-up meant for another waiter.
            if hold.holder.is_none() {
                self.released.notify_one();
            }
            return Err(failure);
        }
    }

    /// Gives up one level of ownership.
    ///
    /// Returns `Ok(true)` if the entry became free and `Err` with the actual holder if
    /// `caller` does not hold the entry.
    pub(crate) fn release(&self, caller: CallerId) -> Result<bool, Option<CallerId>> {
        let mut hold = self.hold.lock();
        if hold.holder != Some(caller) {
            return Err(hold.holder);
        }
        hold.depth -= 1;
        if hold.depth > 0 {
            return Ok(false);
        }
        hold.holder = None;
        drop(hold);
        self.released.notify_one();
        Ok(true)
    }

    /// Wakes every caller blocked on this entry so that they re-check their interruption
    /// flags.
    pub(crate) fn wake_all(&self) {
        let _hold = self.hold.lock();
        self.released.notify_all();
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field(
                "hold",
                &debug_fn(|fmt| match self.hold.try_lock() {
                    Some(hold) => fmt
                        .debug_struct("Hold")
                        .field("holder", &hold.holder)
                        .field("depth", &hold.depth)
                        .finish(),
                    None => fmt.write_str("<busy>"),
                }),
            )
            .finish_non_exhaustive()
    }
}
