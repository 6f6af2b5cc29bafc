/*!
 * Arena Tests
 * Page growth, purge and exhaustion policy
 */

use memory_kernel::memory::Arena;
use memory_kernel::{MemoryConfig, MemoryError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_purge_resets_page_count() {
    let mut arena = Arena::new(256).expect("Failed to create arena");
    for _ in 0..10 {
        arena.allocate(100).expect("Failed to allocate");
    }
    assert!(arena.page_count() > 1);

    arena.purge();
    assert_eq!(arena.page_count(), 0);
    assert_eq!(arena.stats().bytes_reserved, 0);

    // Idempotent
    arena.purge();
    assert_eq!(arena.page_count(), 0);
}

#[test]
fn test_page_limit_with_propagate() {
    let config = MemoryConfig::propagating()
        .with_page_size(256)
        .with_page_limit(2);
    let arena = Arena::with_config(&config).expect("Failed to create arena");
    let usable = arena.usable();

    arena.allocate(usable).expect("first page");
    arena.allocate(usable).expect("second page");
    let err = arena.allocate(usable).unwrap_err();

    assert_eq!(err, MemoryError::PageLimitExceeded { limit: 2 });
    assert!(err.is_exhaustion());
    assert_eq!(arena.page_count(), 2);
}

#[test]
fn test_stats_serialize() {
    let arena = Arena::new(512).expect("Failed to create arena");
    arena.duplicate_str("key").expect("Failed to duplicate");

    let json = serde_json::to_value(arena.stats()).expect("stats serialize");
    assert_eq!(json["pages"], 1);
    assert_eq!(json["page_size"], 512);
}

#[test]
fn test_concurrent_allocation() {
    let arena = Arc::new(Arena::new(1024).expect("Failed to create arena"));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let arena = Arc::clone(&arena);
            thread::spawn(move || {
                for i in 0..100u64 {
                    let value = arena.alloc(i).expect("Failed to allocate");
                    assert_eq!(*value, i);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("allocator thread panicked");
    }
    assert_eq!(arena.stats().bytes_used, 4 * 100 * 8);
}

proptest! {
    #[test]
    fn prop_page_count_matches_packing(sizes in prop::collection::vec(1usize..64, 1..200)) {
        let arena = Arena::new(512).unwrap();
        let usable = arena.usable();
        let align = std::mem::align_of::<usize>();

        // Pointer-aligned sizes packed first-fit into regular pages
        let mut pages: Vec<usize> = Vec::new();
        for size in &sizes {
            let rounded = (size + align - 1) & !(align - 1);
            match pages.iter_mut().rev().find(|free| **free >= rounded) {
                Some(free) => *free -= rounded,
                None => pages.push(usable - rounded),
            }
            arena.allocate(*size).unwrap();
        }

        prop_assert_eq!(arena.page_count(), pages.len());
    }

    #[test]
    fn prop_allocations_stay_inside_arena(sizes in prop::collection::vec(1usize..2048, 1..50)) {
        let arena = Arena::new(256).unwrap();
        for size in sizes {
            let ptr = arena.allocate(size).unwrap();
            prop_assert!(arena.contains(ptr.as_ptr()));
            prop_assert_eq!(ptr.as_ptr() as usize % std::mem::align_of::<usize>(), 0);
        }
    }
}
