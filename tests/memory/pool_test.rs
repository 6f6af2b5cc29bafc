/*!
 * Object Pool Tests
 * Slot reuse, misuse rejection and shared-arena growth
 */

use memory_kernel::memory::{Arena, ObjectPool};
use memory_kernel::MemoryError;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn pool(size: usize) -> ObjectPool {
    let arena = Arc::new(Arena::new(4096).expect("Failed to create arena"));
    ObjectPool::new(arena, size).expect("Failed to create pool")
}

#[test]
fn test_acquire_release_acquire_reuses_address() {
    let pool = pool(48);
    let first = pool.acquire(48).expect("acquire");
    let addr = first.as_ptr();
    pool.release(first).expect("release");

    let second = pool.acquire(48).expect("acquire again");
    assert_eq!(second.as_ptr(), addr, "Released slot should be reused");
    assert_eq!(pool.stats().carved, 1);
}

#[test]
fn test_pools_share_one_arena() {
    let arena = Arc::new(Arena::new(4096).expect("Failed to create arena"));
    let small = ObjectPool::new(Arc::clone(&arena), 16).expect("small pool");
    let large = ObjectPool::new(Arc::clone(&arena), 256).expect("large pool");

    let a = small.acquire(16).expect("small slot");
    let b = large.acquire(256).expect("large slot");
    assert!(arena.contains(a.as_ptr()));
    assert!(arena.contains(b.as_ptr()));
    assert_eq!(arena.page_count(), 1);

    // Slots stay with the pool that produced them
    assert_eq!(large.release(a), Err(MemoryError::ForeignSlot));
    large.release(b).expect("release own slot");
}

#[test]
fn test_size_mismatch_is_rejected() {
    let pool = pool(32);
    let err = pool.acquire(33).unwrap_err();
    assert_eq!(
        err,
        MemoryError::SizeMismatch {
            expected: 32,
            actual: 33
        }
    );
    assert_eq!(pool.stats().carved, 0);
}

#[test]
fn test_concurrent_acquire_release() {
    let pool = Arc::new(pool(64));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..200 {
                    let slot = pool.acquire(64).expect("acquire");
                    // SAFETY: the slot is 64 writable bytes owned by this thread
                    unsafe { std::ptr::write_bytes(slot.as_ptr(), 0xAB, slot.size()) };
                    pool.release(slot).expect("release");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("pool thread panicked");
    }

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.carved <= 4);
    assert_eq!(stats.free, stats.carved);
}

#[test]
fn test_outstanding_slots_are_distinct() {
    let pool = pool(24);
    let slots: Vec<_> = (0..50).map(|_| pool.acquire(24).expect("acquire")).collect();
    let addrs: HashSet<usize> = slots.iter().map(|s| s.as_ptr() as usize).collect();
    assert_eq!(addrs.len(), 50);

    for slot in slots {
        pool.release(slot).expect("release");
    }
    assert_eq!(pool.free_count(), 50);
}

#[test]
fn test_shuffled_release_order() {
    let pool = pool(40);
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut slots: Vec<_> = (0..64).map(|_| pool.acquire(40).expect("acquire")).collect();
    let carved: HashSet<usize> = slots.iter().map(|s| s.as_ptr() as usize).collect();

    slots.shuffle(&mut rng);
    for slot in slots {
        pool.release(slot).expect("release");
    }

    // Every reacquired slot comes from the free list
    let again: HashSet<usize> = (0..64)
        .map(|_| pool.acquire(40).expect("reacquire").as_ptr() as usize)
        .collect();
    assert_eq!(again, carved);
    assert_eq!(pool.stats().carved, 64);
}
