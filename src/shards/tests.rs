use {
    crate::shards::{DEFAULT_SHARDS, Shards},
    std::{sync::Barrier, thread},
};

#[test]
fn default() {
    let shards = Shards::<u32, u32>::default();
    assert_eq!(shards.shard_count(), DEFAULT_SHARDS);
    assert_eq!(shards.len(), 0);
}

#[test]
fn zero_shards() {
    let shards = Shards::<u32, u32>::new(0);
    assert_eq!(shards.shard_count(), 1);
    shards.with(&1, |map| map.insert(1, 10));
    assert_eq!(shards.get(&1), Some(10));
}

#[test]
fn with_and_get() {
    let shards = Shards::new(4);
    for key in 0..100 {
        shards.with(&key, |map| map.insert(key, key * 2));
    }
    assert_eq!(shards.len(), 100);
    for key in 0..100 {
        assert_eq!(shards.get(&key), Some(key * 2));
    }
    assert_eq!(shards.get(&100), None);
    let removed = shards.with(&7, |map| map.remove(&7));
    assert_eq!(removed, Some(14));
    assert_eq!(shards.len(), 99);
}

#[test]
fn concurrent_updates() {
    let shards = Shards::new(8);
    let barrier = Barrier::new(8);
    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                for key in 0..50u32 {
                    shards.with(&key, |map| *map.entry(key).or_insert(0u32) += 1);
                }
            });
        }
    });
    assert_eq!(shards.len(), 50);
    for key in 0..50 {
        assert_eq!(shards.get(&key), Some(8));
    }
}

#[test]
fn find_map() {
    let shards = Shards::new(4);
    for key in 0..20u32 {
        shards.with(&key, |map| map.insert(key, key * 3));
    }
    assert_eq!(shards.find_map(|&k, &v| (v == 27).then_some(k)), Some(9));
    assert_eq!(shards.find_map(|_, &v| (v == 1).then_some(v)), None);
}
