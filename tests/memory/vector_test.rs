/*!
 * Copy-on-Write Vector Tests
 * Sharing, isolation, limits and split semantics
 */

use memory_kernel::memory::{Object, Vector};
use memory_kernel::{MemoryConfig, MemoryError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn values(vector: &Vector<i64>) -> Vec<i64> {
    vector.iter().map(|item| **item).collect()
}

#[test]
fn test_cow_isolation() {
    let x = Object::new(1i64);
    let y = Object::new(2i64);

    let mut a = Vector::new();
    a.add(x.retain()).expect("add");
    let mut b = a.clone();
    b.set(0, y.retain()).expect("set");

    assert!(Object::ptr_eq(a.get(0).expect("a[0]"), &x));
    assert!(Object::ptr_eq(b.get(0).expect("b[0]"), &y));
}

#[test]
fn test_shared_append_does_not_leak_into_sharer() {
    let a: Vector<i64> = (0..3).map(Object::new).collect();
    let mut b = a.clone();
    b.add(Object::new(3)).expect("add");

    assert_eq!(values(&a), vec![0, 1, 2]);
    assert_eq!(values(&b), vec![0, 1, 2, 3]);
    assert!(Object::ptr_eq(a.first().unwrap(), b.first().unwrap()));
}

#[test]
fn test_limit_from_config() {
    let config = MemoryConfig {
        vector_limit: 2,
        ..MemoryConfig::default()
    };
    let mut vector = Vector::with_config(&config);
    vector.add(Object::new(1i64)).expect("add");
    vector.add(Object::new(2i64)).expect("add");

    let err = vector.add(Object::new(3i64)).unwrap_err();
    assert_eq!(err, MemoryError::CapacityExceeded { requested: 3, limit: 2 });
    assert_eq!(values(&vector), vec![1, 2]);
}

#[test]
fn test_split_releases_tail() {
    let tail = Object::new(9i64);
    let mut vector: Vector<i64> = Vector::new();
    vector.add(Object::new(1)).expect("add");
    vector.add(tail.retain()).expect("add");
    assert!(tail.is_copied());

    vector.split(1);
    assert!(!tail.is_copied());
    assert_eq!(vector.len(), 1);
}

#[test]
fn test_clear_keeps_other_handles() {
    let mut a: Vector<i64> = (0..4).map(Object::new).collect();
    let b = a.clone();
    a.clear();
    assert!(a.is_empty());
    assert_eq!(values(&b), vec![0, 1, 2, 3]);
    assert!(!b.is_copied());
}

proptest! {
    #[test]
    fn prop_split_matches_slice(len in 0usize..40, pos in -50isize..50) {
        let source: Vec<i64> = (0..len as i64).collect();
        let original: Vector<i64> = source.iter().copied().map(Object::new).collect();

        let resolved = if pos < 0 {
            len.saturating_sub(pos.unsigned_abs())
        } else {
            (pos as usize).min(len)
        };

        let mut head = original.clone();
        head.split(pos);
        prop_assert_eq!(values(&head), source[..resolved].to_vec());

        let mut tail = original.clone();
        tail.rsplit(pos);
        prop_assert_eq!(values(&tail), source[resolved..].to_vec());

        // Splitting either copy never disturbs the original
        prop_assert_eq!(values(&original), source);
    }
}
