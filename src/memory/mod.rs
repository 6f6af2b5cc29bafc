/*!
 * Memory Module
 * Arena allocation, pooled storage and reference-counted ownership
 */

pub mod arena;
pub mod autorelease;
pub mod lifecycle;
pub mod object;
pub mod pool;
pub mod store;
pub mod traits;
pub mod types;
pub mod vector;

// Re-export for convenience
pub use arena::{with_scratch, Arena};
pub use autorelease::{
    delist_local, local_depth, register_local, release_local, sweep_local, Deferred, ReleaseStack,
};
pub use lifecycle::{
    exit_registry, register_exit, unregister_exit, ExitId, ExitRegistry, Phase,
};
pub use object::{BackingKind, Object};
pub use pool::{ObjectPool, PoolSlot};
pub use store::KeyedStore;
pub use traits::*;
pub use types::*;
pub use vector::Vector;
