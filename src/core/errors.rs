/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors surfaced by the arena, pool, keyed store and vector layers
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum MemoryError {
    #[error("Out of memory: requested {requested} bytes with page size {page_size} ({pages} pages held)")]
    #[diagnostic(
        code(memory::out_of_memory),
        help("The system allocator refused a new page. Purge unused arenas or lower the page size.")
    )]
    OutOfMemory {
        requested: usize,
        page_size: usize,
        pages: usize,
    },

    #[error("Arena page limit reached: {limit} pages")]
    #[diagnostic(
        code(memory::page_limit),
        help("Raise the page limit or purge the arena before allocating more.")
    )]
    PageLimitExceeded { limit: usize },

    #[error("Pool object size mismatch: pool serves {expected} bytes, requested {actual}")]
    #[diagnostic(
        code(memory::size_mismatch),
        help("Each object pool serves exactly one object size. Use a separate pool per size.")
    )]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Slot was not acquired from this pool")]
    #[diagnostic(
        code(memory::foreign_slot),
        help("Return slots to the pool that handed them out.")
    )]
    ForeignSlot,

    #[error("Capacity exceeded: {requested} elements requested, limit {limit}")]
    #[diagnostic(
        code(memory::capacity_exceeded),
        help("The vector limit caps the element count. Split the vector or raise its limit.")
    )]
    CapacityExceeded { requested: usize, limit: usize },

    #[error("Index {index} out of range for length {len}")]
    #[diagnostic(code(memory::index_out_of_range))]
    IndexOutOfRange { index: isize, len: usize },

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(memory::invalid_configuration),
        help("Review the memory configuration parameters.")
    )]
    InvalidConfiguration(String),
}

impl MemoryError {
    /// Whether the error reports resource exhaustion rather than misuse
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            MemoryError::OutOfMemory { .. } | MemoryError::PageLimitExceeded { .. }
        )
    }
}
