//! This crate provides lock managers that lock entities by key, similar to row-level
//! locking in a database.
//!
//! # Motivation
//!
//! Components that store or cache entities often need exclusive access to one entity at a
//! time, for example to read-modify-write a record. Guarding the whole store with a
//! single mutex serializes unrelated work. Keeping a mutex per entity requires managing
//! the lifetime of those mutexes.
//!
//! A [`LockManager`] does the latter for you. Entities are identified by keys of any type
//! that implements [`Eq`], [`Hash`], [`Clone`] and [`Debug`]. The manager does not know
//! anything about the entities themselves:
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Mutex;
//! use entity_lock::LockManager;
//!
//! struct Store {
//!     locks: LockManager<u64>,
//!     balances: Mutex<HashMap<u64, i64>>,
//! }
//!
//! impl Store {
//!     fn transfer(&self, from: u64, to: u64, amount: i64) -> entity_lock::Result<()> {
//!         let _from = self.locks.guard(&from)?;
//!         let _to = self.locks.guard(&to)?;
//!         let mut balances = self.balances.lock().unwrap();
//!         *balances.entry(from).or_default() -= amount;
//!         *balances.entry(to).or_default() += amount;
//!         Ok(())
//!     }
//! }
//!
//! let store = Store {
//!     locks: LockManager::new(),
//!     balances: Mutex::new(HashMap::new()),
//! };
//! store.transfer(1, 2, 10).unwrap();
//! assert_eq!(store.balances.lock().unwrap()[&2], 10);
//! ```
//!
//! # Properties
//!
//! - At most one thread holds a key at a time. Threads locking different keys do not
//!   block each other.
//! - Locks are re-entrant: a thread may lock a key it already holds and must unlock it as
//!   often as it locked it.
//! - Waiting for a key can be bounded with a timeout and cancelled with
//!   [`LockManager::interrupt`].
//! - Before blocking, the manager checks whether the holder of the key is itself blocked
//!   on a key held by the caller. Such a deadlock between two threads is reported as
//!   [`LockError::Deadlock`]. Cycles involving three or more threads are not detected.
//! - Lock records only exist while a key is held or waited for. Locking many distinct
//!   keys over time does not grow the manager.
//! - Waiters are not served in FIFO order.
//!
//! # Global lock
//!
//! [`GlobalLockManager`] additionally offers a global lock that excludes every other
//! thread from locking any key. This requires all bookkeeping to go through a single
//! mutex, which makes per-key operations slower than with [`LockManager`].
//!
//! # Logging
//!
//! The managers emit [`tracing`] events: `trace` for every lock and unlock, `debug` for
//! contention, timeouts, interruptions and global lock changes, and `warn` for detected
//! deadlocks.

#[cfg(doc)]
use std::{fmt::Debug, hash::Hash};
pub use {
    caller::CallerId,
    error::{LockError, Result},
    global::{GlobalLockManager, GlobalTable},
    manager::{KeyGuard, LockManager},
    table::{EntryTable, ShardedTable},
};

mod caller;
mod entry;
mod error;
mod global;
mod manager;
mod shards;
mod table;
mod transaction;
