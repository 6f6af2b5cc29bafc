/*!
 * Memory Types
 * Statistics and identifiers shared across the memory core
 */

use serde::{Deserialize, Serialize};

/// Arena statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaStats {
    pub pages: usize,
    pub page_size: usize,
    /// Maximum pages (0 = unlimited)
    pub page_limit: usize,
    /// Header bytes per page
    pub overhead: usize,
    /// Bytes held across all pages, headers included
    pub bytes_reserved: usize,
    /// Payload bytes handed out
    pub bytes_used: usize,
    /// Payload bytes used as a percentage of payload capacity
    pub utilization: f64,
}

impl ArenaStats {
    pub fn memory_pressure(&self) -> MemoryPressure {
        MemoryPressure::from_usage(self.pages, self.page_limit)
    }
}

/// Page-limit pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    /// Level for `pages` held out of `limit` (0 = unlimited, always low)
    pub fn from_usage(pages: usize, limit: usize) -> Self {
        if limit == 0 {
            return MemoryPressure::Low;
        }
        let percentage = pages as f64 * 100.0 / limit as f64;
        if percentage >= 95.0 {
            MemoryPressure::Critical
        } else if percentage >= 80.0 {
            MemoryPressure::High
        } else if percentage >= 60.0 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

impl std::fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MemoryPressure::Low => write!(f, "LOW"),
            MemoryPressure::Medium => write!(f, "MEDIUM"),
            MemoryPressure::High => write!(f, "HIGH"),
            MemoryPressure::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Object pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub object_size: usize,
    /// Slots waiting on the free list
    pub free: usize,
    /// Slots currently handed out
    pub in_use: usize,
    /// Slots ever carved from the arena
    pub carved: usize,
}

/// Handle identifying an auto-release registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseId(pub(crate) u64);

impl ReleaseId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "release#{}", self.0)
    }
}
