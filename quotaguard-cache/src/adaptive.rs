//! Self-tuning of eviction policy and max age.
//!
//! A pure function of the hit/miss counters, so the same history always
//! yields the same decision.

use crate::stats::hit_rate;
use quotaguard_core::{CacheConfig, EvictionPolicy};
use std::time::Duration;

/// Outcome of one tuning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub policy: EvictionPolicy,
    pub max_age: Duration,
}

/// Decide the policy and max age for the next period.
///
/// With no lookups recorded nothing changes. Below the hit-rate threshold
/// the policy becomes LFU and max age doubles, capped at the configured
/// ceiling. There is no switch back to LRU.
pub fn tune(
    hits: u64,
    misses: u64,
    current: Tuning,
    config: &CacheConfig,
) -> Tuning {
    if hits + misses == 0 || hit_rate(hits, misses) >= config.adaptive_hit_rate_threshold {
        return current;
    }

    let ceiling = config.adaptive_max_age_ceiling;
    Tuning {
        policy: EvictionPolicy::Lfu,
        max_age: current.max_age.saturating_mul(2).min(ceiling).max(current.max_age),
    }
}
