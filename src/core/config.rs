/*!
 * Memory Configuration
 * Tunables for arenas, keyed stores and vectors, with environment overrides
 */

use super::errors::{MemoryError, MemoryResult};
use super::limits::{
    system_page_size, DEFAULT_BUCKET_COUNT, DEFAULT_PAGE_LIMIT, DEFAULT_VECTOR_LIMIT,
};
use crate::memory::arena::HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// What an arena does when it cannot grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Trace the failure and abort the process
    #[default]
    Abort,
    /// Return `MemoryError::OutOfMemory` / `PageLimitExceeded` to the caller
    Propagate,
}

impl FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" | "fail-fast" | "fail_fast" => Ok(ExhaustionPolicy::Abort),
            "propagate" | "error" => Ok(ExhaustionPolicy::Propagate),
            _ => Err(format!("Unknown exhaustion policy: {}", s)),
        }
    }
}

/// Memory core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Arena page size in bytes (0 = platform page size)
    pub page_size: usize,
    /// Maximum pages per arena (0 = unlimited)
    pub page_limit: usize,
    /// Arena behavior on exhaustion
    pub exhaustion: ExhaustionPolicy,
    /// Keyed store bucket count
    pub bucket_count: usize,
    /// Maximum elements per vector
    pub vector_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_size: system_page_size(),
            page_limit: DEFAULT_PAGE_LIMIT,
            exhaustion: ExhaustionPolicy::Abort,
            bucket_count: DEFAULT_BUCKET_COUNT,
            vector_limit: DEFAULT_VECTOR_LIMIT,
        }
    }
}

impl MemoryConfig {
    /// Configuration that reports exhaustion instead of aborting
    pub fn propagating() -> Self {
        Self {
            exhaustion: ExhaustionPolicy::Propagate,
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - MEMKERNEL_PAGE_SIZE: arena page size in bytes
    /// - MEMKERNEL_PAGE_LIMIT: maximum pages per arena (0 = unlimited)
    /// - MEMKERNEL_ON_EXHAUSTION: `abort` or `propagate`
    /// - MEMKERNEL_BUCKETS: keyed store bucket count
    /// - MEMKERNEL_VECTOR_LIMIT: maximum vector length
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(page_size) = env_parse::<usize>("MEMKERNEL_PAGE_SIZE") {
            config.page_size = page_size;
        }
        if let Some(limit) = env_parse::<usize>("MEMKERNEL_PAGE_LIMIT") {
            config.page_limit = limit;
        }
        if let Some(policy) = env_parse::<ExhaustionPolicy>("MEMKERNEL_ON_EXHAUSTION") {
            config.exhaustion = policy;
        }
        if let Some(buckets) = env_parse::<usize>("MEMKERNEL_BUCKETS") {
            config.bucket_count = buckets;
        }
        if let Some(limit) = env_parse::<usize>("MEMKERNEL_VECTOR_LIMIT") {
            config.vector_limit = limit;
        }

        config
    }

    /// Reject values no component can operate with
    pub fn validate(&self) -> MemoryResult<()> {
        if self.page_size != 0 && self.page_size <= HEADER_SIZE {
            return Err(MemoryError::InvalidConfiguration(format!(
                "page_size {} cannot hold the {} byte page header",
                self.page_size, HEADER_SIZE
            )));
        }
        if self.bucket_count == 0 {
            return Err(MemoryError::InvalidConfiguration(
                "bucket_count must be at least 1".into(),
            ));
        }
        if self.vector_limit == 0 {
            return Err(MemoryError::InvalidConfiguration(
                "vector_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring malformed memory setting");
            None
        }
    }
}
