/*!
 * Core Module
 * Errors, limits and configuration shared by the memory core
 */

pub mod config;
pub mod errors;
pub mod limits;

// Re-export for convenience
pub use config::{ExhaustionPolicy, MemoryConfig};
pub use errors::*;
