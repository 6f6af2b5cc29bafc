/*!
 * Memory Kernel Library
 * Arena allocation and reference-counted ownership primitives
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::{ExhaustionPolicy, MemoryConfig, MemoryError, MemoryResult};
pub use memory::{
    Arena, AutoRelease, Deferred, ExitObject, ExitRegistry, KeyedStore, Object, ObjectPool,
    PoolSlot, RefCounted, ReleaseStack, Vector,
};
pub use monitoring::init_tracing;
