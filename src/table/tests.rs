use {
    crate::{
        CallerId,
        table::{EntryTable, ShardedTable, pin, unpin},
        transaction::Transaction,
    },
    std::{
        cell::Cell,
        collections::HashMap,
        sync::{Arc, Barrier},
        thread,
    },
};

#[test]
fn pin_unpin() {
    let mut slots = HashMap::new();
    let first = pin(&mut slots, &"a");
    let second = pin(&mut slots, &"a");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(slots.len(), 1);
    assert_eq!(unpin(&mut slots, &"a"), false);
    assert_eq!(slots.len(), 1);
    assert_eq!(unpin(&mut slots, &"a"), true);
    assert_eq!(slots.len(), 0);
    let third = pin(&mut slots, &"a");
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn pinned_only_by() {
    let me = CallerId::current();
    let mut slots = HashMap::new();
    let entry = pin(&mut slots, &"a");
    assert_eq!(slots[&"a"].is_pinned_only_by(me), false);
    entry.try_acquire(me).unwrap();
    assert_eq!(slots[&"a"].is_pinned_only_by(me), true);
    pin(&mut slots, &"a");
    assert_eq!(slots[&"a"].is_pinned_only_by(me), false);
    entry.try_acquire(me).unwrap();
    assert_eq!(slots[&"a"].is_pinned_only_by(me), true);
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct CountedKey(u32);

thread_local!(static CLONES: Cell<usize> = const { Cell::new(0) });

impl Clone for CountedKey {
    fn clone(&self) -> Self {
        CLONES.with(|clones| clones.set(clones.get() + 1));
        Self(self.0)
    }
}

#[test]
fn pin_clones_key_once() {
    let mut slots = HashMap::new();
    let key = CountedKey(1);
    for _ in 0..3 {
        pin(&mut slots, &key);
    }
    assert_eq!(CLONES.with(Cell::get), 1);
    for _ in 0..3 {
        unpin(&mut slots, &key);
    }
    assert_eq!(slots.len(), 0);
}

#[test]
fn default() {
    let table = ShardedTable::<u32>::default();
    assert_eq!(table.shards(), 64);
    assert_eq!(table.len(), 0);
    assert_eq!(ShardedTable::<u32>::with_shards(0).shards(), 1);
}

#[test]
fn acquire_find_release() {
    let table = ShardedTable::with_shards(4);
    let txn = Transaction::new(CallerId::current());
    assert!(table.find(&1).is_none());
    let entry = table.acquire(&1, &txn, None).unwrap();
    let found = table.find(&1).unwrap();
    assert!(Arc::ptr_eq(&entry, &found));
    assert_eq!(table.len(), 1);
    table.acquire(&2, &txn, None).unwrap();
    assert_eq!(table.len(), 2);
    table.release(&1);
    assert!(table.find(&1).is_none());
    table.release(&2);
    assert_eq!(table.len(), 0);
}

#[test]
fn concurrent_acquire_shares_entry() {
    let table = ShardedTable::with_shards(2);
    let barrier = Barrier::new(8);
    let entries = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    let txn = Transaction::new(CallerId::current());
                    barrier.wait();
                    table.acquire(&"shared", &txn, None).unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert!(entries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(table.len(), 1);
    for _ in 0..7 {
        table.release(&"shared");
        assert_eq!(table.len(), 1);
    }
    table.release(&"shared");
    assert_eq!(table.len(), 0);
}
