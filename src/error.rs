//! Errors reported by the lock managers.
use {crate::CallerId, std::fmt::Debug, thiserror::Error};

/// Convenient alias for results returning a [`LockError`].
pub type Result<T, E = LockError> = std::result::Result<T, E>;

/// Failure of a lock manager operation.
///
/// Keys are rendered with their [`Debug`] implementation so that this type does not
/// depend on the key type.
///
/// Every error aborts the operation that produced it. Nothing is retried internally and
/// any partially acquired state is released before the error is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// `unlock` was called for a key that nobody has locked.
    #[error("key {key} is not locked")]
    UnheldKey { key: String },
    /// `unlock` was called by a caller that does not hold the key.
    #[error("key {key} is not locked by {caller}")]
    NotOwner { key: String, caller: CallerId },
    /// Blocking would have closed a wait cycle between two callers.
    ///
    /// `waiter` tried to lock `key` which is held by `holder`, while `holder` is blocked
    /// on a key held by `waiter`.
    #[error("deadlock on key {key}: {waiter} waits for {holder} which waits for {waiter}")]
    Deadlock {
        key: String,
        waiter: CallerId,
        holder: CallerId,
    },
    /// A bounded wait expired before the key could be locked.
    #[error("timed out waiting for key {key}")]
    Timeout { key: String },
    /// The wait was cancelled with `interrupt`.
    #[error("wait of {caller} was interrupted")]
    Interrupted { caller: CallerId },
    /// The global lock was released without being held by the caller.
    #[error("illegal global lock state: {0}")]
    IllegalState(&'static str),
}

impl LockError {
    pub(crate) fn unheld_key(key: &impl Debug) -> Self {
        Self::UnheldKey {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn not_owner(key: &impl Debug, caller: CallerId) -> Self {
        Self::NotOwner {
            key: format!("{key:?}"),
            caller,
        }
    }

    pub(crate) fn deadlock(key: &impl Debug, waiter: CallerId, holder: CallerId) -> Self {
        Self::Deadlock {
            key: format!("{key:?}"),
            waiter,
            holder,
        }
    }

    pub(crate) fn timeout(key: &impl Debug) -> Self {
        Self::Timeout {
            key: format!("{key:?}"),
        }
    }

    /// Returns whether this error is a [`LockError::Timeout`].
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
