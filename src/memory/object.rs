/*!
 * Reference-Counted Objects
 * Manual retain/release ownership over heap or pool storage
 *
 * An object starts with one implicit owner and an extra-owner count of
 * zero. `retain` adds an owner, `release` removes one or, for the last
 * owner, drops the value and hands the storage back to its backing.
 *
 * Counters are atomic, so handles may be retained and released from
 * different threads when `T` is `Send + Sync`.
 */

use super::pool::{ObjectPool, PoolSlot};
use super::traits::RefCounted;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::limits::MAX_EXTRA_OWNERS;
use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

/// Where an object's storage goes when the last owner releases it
enum Backing {
    Heap,
    Pool(Arc<ObjectPool>),
}

struct ObjectInner<T> {
    extra: AtomicUsize,
    backing: Backing,
    value: T,
}

/// Public view of an object's backing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    Heap,
    Pool,
}

/// Owning handle to a reference-counted value
///
/// Cloning a handle is `retain`; dropping it is `release`.
pub struct Object<T> {
    ptr: NonNull<ObjectInner<T>>,
    _marker: PhantomData<ObjectInner<T>>,
}

// SAFETY: the counter is atomic and the value is only shared immutably
// unless the handle is unique
unsafe impl<T: Send + Sync> Send for Object<T> {}
unsafe impl<T: Send + Sync> Sync for Object<T> {}

impl<T> Object<T> {
    /// Heap-backed object with a single owner
    pub fn new(value: T) -> Self {
        let inner = Box::new(ObjectInner {
            extra: AtomicUsize::new(0),
            backing: Backing::Heap,
            value,
        });
        Self::from_inner(NonNull::from(Box::leak(inner)))
    }

    /// Pool-backed object; storage returns to `pool` on final release
    pub fn new_in(pool: &Arc<ObjectPool>, value: T) -> MemoryResult<Self> {
        let layout = Layout::new::<ObjectInner<T>>();
        let slot_layout = pool.slot_layout();
        if pool.object_size() != layout.size() || slot_layout.align() < layout.align() {
            return Err(MemoryError::SizeMismatch {
                expected: pool.object_size(),
                actual: layout.size(),
            });
        }

        let slot = pool.acquire(layout.size())?;
        let ptr = slot.into_raw().cast::<ObjectInner<T>>();
        // SAFETY: the slot is sized and aligned for ObjectInner<T>
        unsafe {
            ptr::write(
                ptr.as_ptr(),
                ObjectInner {
                    extra: AtomicUsize::new(0),
                    backing: Backing::Pool(Arc::clone(pool)),
                    value,
                },
            );
        }
        Ok(Self::from_inner(ptr))
    }

    /// Pool whose slots fit objects holding a `T`
    pub fn pool(arena: Arc<super::arena::Arena>) -> MemoryResult<Arc<ObjectPool>> {
        ObjectPool::for_layout(arena, Layout::new::<ObjectInner<T>>()).map(Arc::new)
    }

    fn from_inner(ptr: NonNull<ObjectInner<T>>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> &ObjectInner<T> {
        // SAFETY: the inner block lives while any handle exists
        unsafe { self.ptr.as_ref() }
    }

    /// Add an owner and return its handle
    pub fn retain(&self) -> Self {
        let previous = self.inner().extra.fetch_add(1, Ordering::Relaxed);
        assert!(
            previous < MAX_EXTRA_OWNERS,
            "reference count overflow: {} extra owners",
            previous
        );
        Self::from_inner(self.ptr)
    }

    /// Remove this owner
    ///
    /// Returns true when this was the last owner and the object was
    /// deallocated.
    pub fn release(self) -> bool {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never used again
        unsafe { this.release_owner() }
    }

    /// # Safety
    ///
    /// Must be called at most once per handle, after which the handle is
    /// dead.
    unsafe fn release_owner(&self) -> bool {
        let extra = &self.inner().extra;
        let mut current = extra.load(Ordering::Relaxed);
        while current > 0 {
            assert!(
                current <= MAX_EXTRA_OWNERS,
                "corrupted reference count: {}",
                current
            );
            match extra.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return false,
                Err(actual) => current = actual,
            }
        }

        atomic::fence(Ordering::Acquire);
        self.dealloc();
        true
    }

    /// Drop the value and hand storage back to its backing
    ///
    /// # Safety
    ///
    /// Only the last owner may call this.
    unsafe fn dealloc(&self) {
        let ObjectInner { backing, value, .. } = ptr::read(self.ptr.as_ptr());
        drop(value);
        match backing {
            Backing::Heap => {
                drop(Box::from_raw(
                    self.ptr.as_ptr().cast::<MaybeUninit<ObjectInner<T>>>(),
                ));
            }
            Backing::Pool(pool) => {
                let slot = PoolSlot::from_raw(self.ptr.cast(), &pool);
                if let Err(e) = pool.release(slot) {
                    error!(error = %e, "Failed to return object storage to its pool");
                }
            }
        }
    }

    /// True when more than one owner holds this object
    #[inline]
    pub fn is_copied(&self) -> bool {
        self.inner().extra.load(Ordering::Acquire) > 0
    }

    /// Owners beyond the first
    #[inline]
    pub fn extra_owners(&self) -> usize {
        self.inner().extra.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    pub fn backing(&self) -> BackingKind {
        match self.inner().backing {
            Backing::Heap => BackingKind::Heap,
            Backing::Pool(_) => BackingKind::Pool,
        }
    }

    /// Mutable access when this handle is the only owner
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.is_copied() {
            return None;
        }
        // SAFETY: no other handle exists, so nobody else can observe the value
        Some(unsafe { &mut (*self.ptr.as_ptr()).value })
    }

    fn duplicate(&self) -> MemoryResult<Self>
    where
        T: Clone,
    {
        let value = self.inner().value.clone();
        match &self.inner().backing {
            Backing::Heap => Ok(Self::new(value)),
            Backing::Pool(pool) => Self::new_in(pool, value),
        }
    }

    /// Clone-on-write access: detach from other owners first if shared
    pub fn make_mut(&mut self) -> MemoryResult<&mut T>
    where
        T: Clone,
    {
        if self.is_copied() {
            let unique = self.duplicate()?;
            drop(mem::replace(self, unique));
        }
        // SAFETY: either we were unique already or we just replaced self
        // with a fresh single-owner object
        Ok(unsafe { &mut (*self.ptr.as_ptr()).value })
    }
}

impl<T> Clone for Object<T> {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl<T> Drop for Object<T> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and the handle is gone afterwards
        unsafe {
            self.release_owner();
        }
    }
}

impl<T> Deref for Object<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T: fmt::Debug> fmt::Debug for Object<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("value", &self.inner().value)
            .field("extra_owners", &self.extra_owners())
            .finish()
    }
}

impl<T> RefCounted for Object<T> {
    fn retain(&self) -> Self {
        Object::retain(self)
    }

    fn release(self) -> bool {
        Object::release(self)
    }

    fn is_copied(&self) -> bool {
        Object::is_copied(self)
    }
}
