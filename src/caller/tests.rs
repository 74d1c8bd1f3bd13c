use {
    crate::CallerId,
    std::{collections::HashSet, thread},
};

#[test]
fn current() {
    assert_ne!(CallerId::current().as_u64(), 0);
    assert_eq!(CallerId::current(), CallerId::current());
    let other = thread::spawn(CallerId::current).join().unwrap();
    assert_ne!(CallerId::current(), other);
}

#[test]
fn never_reused() {
    let mut seen = HashSet::new();
    seen.insert(CallerId::current());
    for _ in 0..32 {
        // Each thread has terminated before the next one starts.
        let id = thread::spawn(CallerId::current).join().unwrap();
        assert!(seen.insert(id));
    }
}

#[test]
fn display() {
    let id = CallerId::current();
    assert_eq!(id.to_string(), format!("caller#{}", id.as_u64()));
}
