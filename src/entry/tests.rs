use {
    crate::{
        CallerId,
        entry::{Entry, WaitFailure},
    },
    std::{
        sync::{
            Barrier,
            atomic::{AtomicBool, Ordering::Relaxed},
        },
        thread,
        time::{Duration, Instant},
    },
};

fn run_in_thread<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    thread::scope(|s| s.spawn(|| f()).join().unwrap())
}

#[test]
fn new() {
    let entry = Entry::new();
    assert_eq!(entry.holder(), None);
    assert_eq!(entry.is_held_by(CallerId::current()), false);
}

#[test]
fn try_acquire() {
    let entry = Entry::new();
    let me = CallerId::current();
    assert_eq!(entry.try_acquire(me), Ok(()));
    assert_eq!(entry.holder(), Some(me));
    assert_eq!(entry.try_acquire(me), Ok(()));
    assert_eq!(entry.depth_of(me), 2);
    run_in_thread(|| {
        assert_eq!(entry.try_acquire(CallerId::current()), Err(me));
        assert_eq!(entry.depth_of(CallerId::current()), 0);
    });
    assert_eq!(entry.release(me), Ok(false));
    assert_eq!(entry.is_held_by(me), true);
    assert_eq!(entry.release(me), Ok(true));
    assert_eq!(entry.holder(), None);
    run_in_thread(|| {
        let other = CallerId::current();
        assert_eq!(entry.try_acquire(other), Ok(()));
        assert_eq!(entry.release(other), Ok(true));
    });
}

#[test]
fn release_not_held() {
    let entry = Entry::new();
    let me = CallerId::current();
    assert_eq!(entry.release(me), Err(None));
    let other = run_in_thread(|| {
        let other = CallerId::current();
        entry.try_acquire(other).unwrap();
        other
    });
    assert_eq!(entry.release(me), Err(Some(other)));
    assert_eq!(entry.holder(), Some(other));
}

#[test]
fn acquire_until_free() {
    let entry = Entry::new();
    let me = CallerId::current();
    assert_eq!(entry.acquire_until(me, None, || false), Ok(()));
    assert_eq!(entry.holder(), Some(me));
    assert_eq!(entry.release(me), Ok(true));
}

#[test]
fn acquire_until_timeout() {
    let entry = Entry::new();
    let me = CallerId::current();
    entry.try_acquire(me).unwrap();
    let duration = Duration::from_millis(100);
    run_in_thread(|| {
        let start = Instant::now();
        let res = entry.acquire_until(CallerId::current(), Some(start + duration), || false);
        assert_eq!(res, Err(WaitFailure::TimedOut));
        assert!(start.elapsed() >= duration);
    });
    assert_eq!(entry.holder(), Some(me));
}

#[test]
fn acquire_until_release() {
    let entry = Entry::new();
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        let holder = s.spawn(|| {
            let me = CallerId::current();
            entry.try_acquire(me).unwrap();
            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            entry.release(me).unwrap();
        });
        barrier.wait();
        let me = CallerId::current();
        assert_eq!(entry.acquire_until(me, None, || false), Ok(()));
        assert_eq!(entry.holder(), Some(me));
        holder.join().unwrap();
        assert_eq!(entry.release(me), Ok(true));
    });
}

#[test]
fn acquire_until_interrupted() {
    let entry = Entry::new();
    let interrupted = AtomicBool::new(false);
    entry.try_acquire(CallerId::current()).unwrap();
    thread::scope(|s| {
        let waiter = s.spawn(|| {
            entry.acquire_until(CallerId::current(), None, || interrupted.swap(false, Relaxed))
        });
        thread::sleep(Duration::from_millis(50));
        interrupted.store(true, Relaxed);
        entry.wake_all();
        assert_eq!(waiter.join().unwrap(), Err(WaitFailure::Interrupted));
    });
    assert_eq!(interrupted.load(Relaxed), false);
}

#[test]
fn debug() {
    let entry = Entry::new();
    let me = CallerId::current();
    entry.try_acquire(me).unwrap();
    let formatted = format!("{entry:?}");
    assert!(formatted.contains("depth: 1"));
    assert!(formatted.contains(&format!("{me:?}")));
}
