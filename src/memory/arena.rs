/*!
 * Arena Allocation
 * Page-chunked bump allocation with whole-arena cleanup
 */

use super::types::{ArenaStats, MemoryPressure};
use crate::core::config::{ExhaustionPolicy, MemoryConfig};
use crate::core::errors::{MemoryError, MemoryResult};
use crate::core::limits::{system_page_size, ARENA_ALIGNMENT};
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::mem;
use std::ptr::{self, NonNull};
use tracing::{debug, error, trace, warn};

/// Header written at the start of every page
#[repr(C)]
struct PageHeader {
    next: Option<NonNull<PageHeader>>,
    /// Bytes consumed, header included
    used: usize,
    /// Total block size
    size: usize,
}

const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Size of the page header as seen by the bump cursor
pub(crate) const HEADER_SIZE: usize = {
    let raw = mem::size_of::<PageHeader>();
    (raw + ARENA_ALIGNMENT - 1) & !(ARENA_ALIGNMENT - 1)
};

/// Newest-first singly linked chain of pages
struct PageChain {
    head: Option<NonNull<PageHeader>>,
    count: usize,
    limit: usize,
}

// SAFETY: the chain exclusively owns its pages; access is serialized by the
// arena mutex or by `&mut Arena`.
unsafe impl Send for PageChain {}

impl PageChain {
    fn pages(&self) -> PageIter<'_> {
        PageIter {
            next: self.head,
            _chain: self,
        }
    }

    /// First-fit bump from the newest page backwards
    fn bump(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let mut cursor = self.head;
        while let Some(mut page) = cursor {
            // SAFETY: every page in the chain is live until purge
            let header = unsafe { page.as_mut() };
            let base = page.as_ptr() as usize;
            let start = base + header.used;
            if let Some(aligned) = align_up(start, layout.align()) {
                let end = aligned.checked_add(layout.size());
                if let Some(end) = end {
                    if end <= base + header.size {
                        header.used = end - base;
                        // SAFETY: aligned lies inside this page's block
                        return Some(unsafe {
                            NonNull::new_unchecked(page.as_ptr().cast::<u8>().add(aligned - base))
                        });
                    }
                }
            }
            cursor = header.next;
        }
        None
    }

    /// Link a fresh page of `bytes` in front of the chain
    fn grow(&mut self, bytes: usize) -> Result<(), GrowError> {
        if self.limit > 0 && self.count >= self.limit {
            return Err(GrowError::Limit);
        }
        let layout = page_layout(bytes).ok_or(GrowError::Layout)?;

        // SAFETY: layout has non-zero size (bytes > HEADER_SIZE)
        let raw = unsafe { alloc::alloc(layout) };
        let page = NonNull::new(raw.cast::<PageHeader>()).ok_or(GrowError::System)?;

        // SAFETY: fresh block, suitably aligned for the header
        unsafe {
            ptr::write(
                page.as_ptr(),
                PageHeader {
                    next: self.head,
                    used: HEADER_SIZE,
                    size: bytes,
                },
            );
        }
        self.head = Some(page);
        self.count += 1;
        Ok(())
    }

    fn release_all(&mut self) -> usize {
        let mut released = 0;
        let mut cursor = self.head.take();
        while let Some(page) = cursor {
            // SAFETY: page is live and owned by this chain
            let (next, size) = unsafe {
                let header = page.as_ref();
                (header.next, header.size)
            };
            if let Some(layout) = page_layout(size) {
                // SAFETY: allocated in `grow` with this exact layout
                unsafe { alloc::dealloc(page.as_ptr().cast::<u8>(), layout) };
            }
            released += 1;
            cursor = next;
        }
        self.count = 0;
        released
    }
}

struct PageIter<'a> {
    next: Option<NonNull<PageHeader>>,
    _chain: &'a PageChain,
}

impl<'a> Iterator for PageIter<'a> {
    type Item = &'a PageHeader;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.next?;
        // SAFETY: the borrowed chain keeps every page alive
        let header = unsafe { &*page.as_ptr() };
        self.next = header.next;
        Some(header)
    }
}

enum GrowError {
    Limit,
    Layout,
    System,
}

fn page_layout(bytes: usize) -> Option<Layout> {
    Layout::from_size_align(bytes, ARENA_ALIGNMENT.max(mem::align_of::<PageHeader>())).ok()
}

/// Page-chunked bump allocator
///
/// Memory handed out lives until [`Arena::purge`] or drop; there is no
/// per-allocation free. Requests that do not fit a regular page get a
/// dedicated page sized to the request.
///
/// # Performance
///
/// - **Allocation**: O(pages) first-fit scan, O(1) in the common case
/// - **Deallocation**: O(pages), all at once
///
/// # Example
///
/// ```
/// use memory_kernel::memory::Arena;
///
/// let arena = Arena::new(4096).unwrap();
/// let name = arena.duplicate_str("config").unwrap();
/// assert_eq!(name, "config");
/// assert_eq!(arena.page_count(), 1);
/// ```
pub struct Arena {
    chain: Mutex<PageChain>,
    page_size: usize,
    policy: ExhaustionPolicy,
}

impl Arena {
    /// Create an arena with the given page size (0 = platform page size)
    pub fn new(page_size: usize) -> MemoryResult<Self> {
        Self::build(page_size, 0, ExhaustionPolicy::Abort)
    }

    /// Create an arena from configuration
    pub fn with_config(config: &MemoryConfig) -> MemoryResult<Self> {
        Self::build(config.page_size, config.page_limit, config.exhaustion)
    }

    fn build(page_size: usize, limit: usize, policy: ExhaustionPolicy) -> MemoryResult<Self> {
        let page_size = if page_size == 0 {
            system_page_size()
        } else {
            page_size
        };
        let page_size = align_up(page_size, ARENA_ALIGNMENT).ok_or_else(|| {
            MemoryError::InvalidConfiguration(format!("page size {} overflows", page_size))
        })?;
        if page_size <= HEADER_SIZE {
            return Err(MemoryError::InvalidConfiguration(format!(
                "page size {} cannot hold the {} byte page header",
                page_size, HEADER_SIZE
            )));
        }

        Ok(Self {
            chain: Mutex::new(PageChain {
                head: None,
                count: 0,
                limit,
            }),
            page_size,
            policy,
        })
    }

    /// Allocate `size` bytes of pointer-aligned storage
    pub fn allocate(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        if size == 0 {
            return Ok(NonNull::<usize>::dangling().cast());
        }
        let layout = align_up(size, ARENA_ALIGNMENT)
            .and_then(|rounded| Layout::from_size_align(rounded, ARENA_ALIGNMENT).ok())
            .ok_or_else(|| self.overflow(size, self.page_count()))?;
        self.allocate_layout(layout)
    }

    /// Allocate storage for an arbitrary layout
    pub fn allocate_layout(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        if layout.size() == 0 {
            // SAFETY: alignment is a non-zero power of two
            return Ok(unsafe { NonNull::new_unchecked(layout.align() as *mut u8) });
        }

        let mut chain = self.chain.lock();
        if let Some(ptr) = chain.bump(layout) {
            return Ok(ptr);
        }

        // Worst-case padding after the header when the caller wants more
        // than pointer alignment
        let padding = layout.align().saturating_sub(ARENA_ALIGNMENT);
        let needed = layout
            .size()
            .checked_add(padding)
            .ok_or_else(|| self.overflow(layout.size(), chain.count))?;

        let page_bytes = if needed > self.usable() {
            let bytes = HEADER_SIZE
                .checked_add(needed)
                .and_then(|b| align_up(b, ARENA_ALIGNMENT))
                .ok_or_else(|| self.overflow(layout.size(), chain.count))?;
            trace!(
                requested = layout.size(),
                page_bytes = bytes,
                "Allocating dedicated oversized page"
            );
            bytes
        } else {
            self.page_size
        };

        match chain.grow(page_bytes) {
            Ok(()) => {
                debug!(
                    pages = chain.count,
                    page_bytes = page_bytes,
                    "Arena grew by one page"
                );
                let pressure = MemoryPressure::from_usage(chain.count, chain.limit);
                if pressure.is_elevated() {
                    warn!(
                        pages = chain.count,
                        limit = chain.limit,
                        pressure = %pressure,
                        "Arena nearing its page limit"
                    );
                }
                let pages = chain.count;
                chain
                    .bump(layout)
                    .ok_or_else(|| self.overflow(layout.size(), pages))
            }
            Err(GrowError::Limit) => {
                let err = MemoryError::PageLimitExceeded { limit: chain.limit };
                let pages = chain.count;
                drop(chain);
                self.exhausted(err, page_bytes, pages)
            }
            Err(GrowError::Layout) => Err(self.overflow(layout.size(), chain.count)),
            Err(GrowError::System) => {
                let err = MemoryError::OutOfMemory {
                    requested: layout.size(),
                    page_size: self.page_size,
                    pages: chain.count,
                };
                let pages = chain.count;
                drop(chain);
                self.exhausted(err, page_bytes, pages)
            }
        }
    }

    /// Allocate zero-filled storage
    pub fn allocate_zeroed(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        let ptr = self.allocate(size)?;
        // SAFETY: `size` bytes were just reserved at ptr
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    /// Move a value into the arena
    ///
    /// The value is never dropped; arena memory has no per-object destructor.
    pub fn alloc<T>(&self, value: T) -> MemoryResult<&mut T> {
        let ptr = self.allocate_layout(Layout::new::<T>())?.cast::<T>();
        // SAFETY: fresh, aligned, exclusively owned storage for one T
        unsafe {
            ptr::write(ptr.as_ptr(), value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copy text into the arena with a trailing NUL
    ///
    /// The returned slice excludes the terminator.
    pub fn duplicate_str(&self, text: &str) -> MemoryResult<&str> {
        let len = text.len();
        let ptr = self.allocate(len + 1)?;
        // SAFETY: len + 1 bytes reserved; source and destination are disjoint
        unsafe {
            ptr::copy_nonoverlapping(text.as_ptr(), ptr.as_ptr(), len);
            *ptr.as_ptr().add(len) = 0;
            let bytes = std::slice::from_raw_parts(ptr.as_ptr(), len);
            Ok(std::str::from_utf8_unchecked(bytes))
        }
    }

    /// Copy a block of bytes into the arena
    pub fn duplicate_block(&self, data: &[u8]) -> MemoryResult<&mut [u8]> {
        let ptr = self.allocate(data.len())?;
        // SAFETY: data.len() bytes reserved; regions are disjoint
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), data.len()))
        }
    }

    /// Release every page
    ///
    /// Raw pointers previously returned by [`Arena::allocate`] dangle
    /// afterwards. Purging an empty arena is a no-op.
    pub fn purge(&mut self) {
        let released = self.chain.get_mut().release_all();
        if released > 0 {
            debug!(pages = released, "Arena purged");
        }
    }

    /// Number of pages currently held
    pub fn page_count(&self) -> usize {
        self.chain.lock().count
    }

    /// Regular page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes of every page consumed by its header
    pub fn overhead(&self) -> usize {
        HEADER_SIZE
    }

    /// Largest request a regular page can serve
    pub fn usable(&self) -> usize {
        self.page_size - HEADER_SIZE
    }

    /// Maximum page count (0 = unlimited)
    pub fn page_limit(&self) -> usize {
        self.chain.lock().limit
    }

    pub fn set_page_limit(&self, limit: usize) {
        self.chain.lock().limit = limit;
    }

    /// Page usage against the page limit
    pub fn memory_pressure(&self) -> MemoryPressure {
        let chain = self.chain.lock();
        MemoryPressure::from_usage(chain.count, chain.limit)
    }

    /// Whether `ptr` points into memory this arena handed out
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let chain = self.chain.lock();
        let found = chain.pages().any(|header| {
            let base = header as *const PageHeader as usize;
            addr >= base + HEADER_SIZE && addr < base + header.used
        });
        found
    }

    /// Percentage of page payload bytes in use
    pub fn utilization(&self) -> f64 {
        self.stats().utilization
    }

    pub fn stats(&self) -> ArenaStats {
        let chain = self.chain.lock();
        let mut reserved = 0;
        let mut used = 0;
        for header in chain.pages() {
            reserved += header.size;
            used += header.used - HEADER_SIZE;
        }
        let payload = reserved - chain.count * HEADER_SIZE;
        ArenaStats {
            pages: chain.count,
            page_size: self.page_size,
            page_limit: chain.limit,
            overhead: HEADER_SIZE,
            bytes_reserved: reserved,
            bytes_used: used,
            utilization: if payload == 0 {
                0.0
            } else {
                used as f64 * 100.0 / payload as f64
            },
        }
    }

    fn overflow(&self, requested: usize, pages: usize) -> MemoryError {
        MemoryError::OutOfMemory {
            requested,
            page_size: self.page_size,
            pages,
        }
    }

    fn exhausted<T>(&self, err: MemoryError, page_bytes: usize, pages: usize) -> MemoryResult<T> {
        match self.policy {
            ExhaustionPolicy::Propagate => Err(err),
            ExhaustionPolicy::Abort => {
                error!(error = %err, pages = pages, "Arena exhausted, aborting");
                let layout = page_layout(page_bytes).unwrap_or_else(Layout::new::<PageHeader>);
                alloc::handle_alloc_error(layout)
            }
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            chain: Mutex::new(PageChain {
                head: None,
                count: 0,
                limit: 0,
            }),
            page_size: align_up(system_page_size(), ARENA_ALIGNMENT)
                .unwrap_or(system_page_size())
                .max(HEADER_SIZE * 2),
            policy: ExhaustionPolicy::Abort,
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.chain.get_mut().release_all();
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("page_size", &self.page_size)
            .field("pages", &self.page_count())
            .field("policy", &self.policy)
            .finish()
    }
}

// Thread-local scratch arena for short-lived allocations
thread_local! {
    static SCRATCH: RefCell<Option<Arena>> = const { RefCell::new(None) };
}

/// Execute closure with a thread-local scratch arena
///
/// The arena is purged when the closure returns and reused by the next call
/// on this thread. Nested calls get their own arena.
pub fn with_scratch<F, R>(f: F) -> R
where
    F: FnOnce(&Arena) -> R,
{
    let mut arena = SCRATCH
        .with(|cell| cell.borrow_mut().take())
        .unwrap_or_default();

    let result = f(&arena);
    arena.purge();

    SCRATCH.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(arena);
        }
    });
    result
}
