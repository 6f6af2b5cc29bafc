/*!
 * System Limits and Constants
 *
 * Centralized location for the defaults and thresholds of the memory core.
 * Grouped by component; performance-sensitive values are marked with [PERF].
 */

// =============================================================================
// ARENA
// =============================================================================

/// Fallback page size when the platform cannot report one (4KB)
pub const FALLBACK_PAGE_SIZE: usize = 4 * 1024;

/// Alignment of every arena allocation
/// [PERF] Pointer alignment keeps headers and payload words naturally aligned
pub const ARENA_ALIGNMENT: usize = std::mem::align_of::<usize>();

/// Default page limit (0 = unlimited)
pub const DEFAULT_PAGE_LIMIT: usize = 0;

// =============================================================================
// KEYED STORE
// =============================================================================

/// Default bucket count for keyed stores
/// Sized for small configuration-like datasets
pub const DEFAULT_BUCKET_COUNT: usize = 177;

/// Fixed hash seeds so bucket placement is stable across runs
pub const STORE_HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

// =============================================================================
// VECTOR
// =============================================================================

/// Default element limit for copy-on-write vectors (unbounded)
pub const DEFAULT_VECTOR_LIMIT: usize = usize::MAX;

/// Minimum capacity reserved when a vector array is first created
/// [PERF] Avoids a clone per element for short append sequences
pub const MIN_VECTOR_CAPACITY: usize = 4;

// =============================================================================
// REFERENCE COUNTING
// =============================================================================

/// Upper bound on extra owners before the counter is considered corrupted
pub const MAX_EXTRA_OWNERS: usize = isize::MAX as usize;

/// Query the platform page size
pub fn system_page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    FALLBACK_PAGE_SIZE
}
