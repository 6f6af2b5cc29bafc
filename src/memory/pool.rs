/*!
 * Object Pooling
 * Recycles fixed-size slots carved from an arena
 */

use super::arena::Arena;
use super::types::PoolStats;
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::limits::ARENA_ALIGNMENT;
use parking_lot::Mutex;
use std::alloc::Layout;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Link stored inside a released slot
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct FreeList {
    head: Option<NonNull<FreeNode>>,
    free: usize,
    carved: usize,
}

// SAFETY: free slots are owned by the list and only touched under its mutex
unsafe impl Send for FreeList {}

/// Opaque storage handed out by an [`ObjectPool`]
///
/// The slot must go back to the pool that produced it. Dropping a slot
/// without releasing it leaves the bytes in the arena until the arena dies.
#[derive(Debug)]
#[must_use = "slots should be released back to their pool"]
pub struct PoolSlot {
    ptr: NonNull<u8>,
    size: usize,
    pool_id: u64,
}

// SAFETY: a slot is exclusive ownership of its bytes
unsafe impl Send for PoolSlot {}

impl PoolSlot {
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_non_null(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Usable bytes at `as_ptr`
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Rebuild a slot from a pointer previously obtained via `into_raw`
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`PoolSlot::into_raw`] on a slot of `pool` and
    /// must not have been rebuilt already.
    pub(crate) unsafe fn from_raw(ptr: NonNull<u8>, pool: &ObjectPool) -> Self {
        Self {
            ptr,
            size: pool.layout.size(),
            pool_id: pool.id,
        }
    }

    pub(crate) fn into_raw(self) -> NonNull<u8> {
        self.ptr
    }
}

/// Free-list cache of fixed-size objects backed by an [`Arena`]
///
/// # Performance
///
/// - **Reuse**: O(1) pop from the free list, no arena lock taken
/// - **Growth**: carves a fresh slot from the arena under its lock
///
/// # Example
///
/// ```
/// use memory_kernel::memory::{Arena, ObjectPool};
/// use std::sync::Arc;
///
/// let pool = ObjectPool::new(Arc::new(Arena::new(4096).unwrap()), 64).unwrap();
/// let slot = pool.acquire(64).unwrap();
/// let addr = slot.as_ptr();
/// pool.release(slot).unwrap();
/// assert_eq!(pool.acquire(64).unwrap().as_ptr(), addr);
/// ```
pub struct ObjectPool {
    arena: Arc<Arena>,
    /// Size callers must request
    size: usize,
    /// Slot layout actually carved
    layout: Layout,
    id: u64,
    free: Mutex<FreeList>,
}

impl ObjectPool {
    /// Create a pool serving objects of `object_size` bytes
    pub fn new(arena: Arc<Arena>, object_size: usize) -> MemoryResult<Self> {
        let layout = Layout::from_size_align(object_size, ARENA_ALIGNMENT)
            .map_err(|e| MemoryError::InvalidConfiguration(e.to_string()))?;
        Self::for_layout(arena, layout)
    }

    /// Create a pool whose slots satisfy `layout`
    pub fn for_layout(arena: Arc<Arena>, layout: Layout) -> MemoryResult<Self> {
        if layout.size() == 0 {
            return Err(MemoryError::InvalidConfiguration(
                "pool object size must be non-zero".into(),
            ));
        }
        let slot = Layout::from_size_align(
            layout.size().max(mem::size_of::<FreeNode>()),
            layout.align().max(mem::align_of::<FreeNode>()),
        )
        .map_err(|e| MemoryError::InvalidConfiguration(e.to_string()))?
        .pad_to_align();

        Ok(Self {
            arena,
            size: layout.size(),
            layout: slot,
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            free: Mutex::new(FreeList {
                head: None,
                free: 0,
                carved: 0,
            }),
        })
    }

    /// Hand out a slot, reusing a released one when available
    pub fn acquire(&self, size: usize) -> MemoryResult<PoolSlot> {
        if size != self.size {
            warn!(
                expected = self.size,
                actual = size,
                "Rejected pool acquire with mismatched size"
            );
            return Err(MemoryError::SizeMismatch {
                expected: self.size,
                actual: size,
            });
        }

        {
            let mut list = self.free.lock();
            if let Some(node) = list.head {
                // SAFETY: nodes on the list are released slots holding a FreeNode
                list.head = unsafe { node.as_ref().next };
                list.free -= 1;
                return Ok(PoolSlot {
                    ptr: node.cast(),
                    size: self.layout.size(),
                    pool_id: self.id,
                });
            }
        }

        let ptr = self.arena.allocate_layout(self.layout)?;
        let carved = {
            let mut list = self.free.lock();
            list.carved += 1;
            list.carved
        };
        trace!(pool = self.id, carved = carved, "Carved new pool slot");

        Ok(PoolSlot {
            ptr,
            size: self.layout.size(),
            pool_id: self.id,
        })
    }

    /// Return a slot to the free list
    ///
    /// No destructor runs; the caller must already have torn down whatever
    /// was constructed in the slot.
    pub fn release(&self, slot: PoolSlot) -> MemoryResult<()> {
        if slot.pool_id != self.id {
            warn!(pool = self.id, owner = slot.pool_id, "Rejected foreign pool slot");
            return Err(MemoryError::ForeignSlot);
        }

        let node = slot.ptr.cast::<FreeNode>();
        let mut list = self.free.lock();
        // SAFETY: the slot is at least FreeNode-sized and aligned, and owned
        // exclusively by the caller until now
        unsafe { ptr::write(node.as_ptr(), FreeNode { next: list.head }) };
        list.head = Some(node);
        list.free += 1;
        Ok(())
    }

    /// Size callers pass to [`ObjectPool::acquire`]
    pub fn object_size(&self) -> usize {
        self.size
    }

    /// Layout of each carved slot
    pub fn slot_layout(&self) -> Layout {
        self.layout
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().free
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn stats(&self) -> PoolStats {
        let list = self.free.lock();
        PoolStats {
            object_size: self.size,
            free: list.free,
            in_use: list.carved - list.free,
            carved: list.carved,
        }
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("id", &self.id)
            .field("object_size", &self.size)
            .field("free", &self.free_count())
            .finish()
    }
}
