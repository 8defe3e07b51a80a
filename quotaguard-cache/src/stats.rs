//! Cache statistics.

use quotaguard_core::EvictionPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed by capacity eviction or `clear`.
    pub evictions: u64,
    /// Live value and key-list entries.
    pub total_size: usize,
    /// Opened store handles held.
    pub handle_count: usize,
    pub policy: EvictionPolicy,
    pub max_age: Duration,
}

impl CacheStatistics {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.misses)
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
