/*!
 * Reference-Counted Object Tests
 * Ownership counting across heap and pool backings
 */

use memory_kernel::memory::{Arena, BackingKind, Object};
use memory_kernel::RefCounted;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_retain_retain_release() {
    let deallocs = Arc::new(AtomicUsize::new(0));
    let obj = Object::new(Tracked(deallocs.clone()));

    let a = obj.retain();
    let b = obj.retain();
    assert!(!a.release());
    assert!(obj.is_copied(), "One extra owner remains");

    assert!(!b.release());
    assert!(!obj.is_copied());
    assert_eq!(deallocs.load(Ordering::SeqCst), 0);

    // retains + 1 releases in total
    assert!(obj.release());
    assert_eq!(deallocs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_generic_over_ref_counted() {
    fn share<R: RefCounted>(item: &R) -> (R, bool) {
        let extra = item.retain();
        let copied = item.is_copied();
        (extra, copied)
    }

    let obj = Object::new("shared");
    let (extra, copied) = share(&obj);
    assert!(copied);
    assert!(!RefCounted::release(extra));
    assert!(!obj.is_copied());
}

#[test]
fn test_pool_objects_recycle_storage() {
    let deallocs = Arc::new(AtomicUsize::new(0));
    let arena = Arc::new(Arena::new(4096).expect("Failed to create arena"));
    let pool = Object::<Tracked>::pool(arena).expect("Failed to create pool");

    let first = Object::new_in(&pool, Tracked(deallocs.clone())).expect("pooled object");
    assert_eq!(first.backing(), BackingKind::Pool);
    drop(first);
    assert_eq!(deallocs.load(Ordering::SeqCst), 1);
    assert_eq!(pool.free_count(), 1);

    let second = Object::new_in(&pool, Tracked(deallocs.clone())).expect("pooled object");
    assert_eq!(pool.free_count(), 0);
    assert_eq!(pool.stats().carved, 1);
    drop(second);
}

#[test]
fn test_concurrent_retain_release() {
    let deallocs = Arc::new(AtomicUsize::new(0));
    let obj = Object::new(Tracked(deallocs.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let local = obj.retain();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let extra = local.retain();
                    extra.release();
                }
                local.release();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("refcount thread panicked");
    }

    assert_eq!(obj.extra_owners(), 0);
    assert_eq!(deallocs.load(Ordering::SeqCst), 0);
    assert!(obj.release());
    assert_eq!(deallocs.load(Ordering::SeqCst), 1);
}
