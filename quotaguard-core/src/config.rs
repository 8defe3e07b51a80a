//! Configuration types

use crate::{ConfigError, GuardResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy used to pick a victim when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest last access.
    #[default]
    Lru,
    /// Evict the entry with the fewest accesses.
    Lfu,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Some(Self::Lru),
            "lfu" => Some(Self::Lfu),
            _ => None,
        }
    }
}

/// Cache engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of value and key-list entries held at once.
    pub max_entries: usize,
    /// Entries older than this are stale.
    pub max_age: Duration,
    /// Period of the background cleanup task.
    pub cleanup_interval: Duration,
    /// Initial eviction strategy.
    pub eviction_policy: EvictionPolicy,
    /// Hit rate below which adaptive tuning switches to LFU.
    pub adaptive_hit_rate_threshold: f64,
    /// Upper bound adaptive tuning may raise `max_age` to.
    pub adaptive_max_age_ceiling: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_age: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            eviction_policy: EvictionPolicy::Lru,
            adaptive_hit_rate_threshold: 0.7,
            adaptive_max_age_ceiling: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the entry max age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the eviction policy.
    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }
}

/// Request budget and throttle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum (and initial) number of calls allowed.
    pub ceiling: u32,
    /// Time it takes to earn back one unit of budget.
    pub cooldown: Duration,
    /// Throttle window engaged when the remote reports a rate limit.
    pub throttle_duration: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            ceiling: 60,
            cooldown: Duration::from_secs(1),
            throttle_duration: Duration::from_secs(60),
        }
    }
}

/// Retry configuration for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

/// Deferred request queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Requests older than this are discarded with a timeout.
    pub max_age: Duration,
    /// Pause between two drained requests.
    pub pacing: Duration,
    /// Period of the optional background drain task.
    pub drain_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            pacing: Duration::from_millis(100),
            drain_interval: Duration::from_secs(5),
        }
    }
}

/// Input validation limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub max_key_length: usize,
    pub max_store_name_length: usize,
    pub max_value_bytes: usize,
    pub max_page_size: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_key_length: 50,
            max_store_name_length: 50,
            max_value_bytes: 4 * 1024 * 1024,
            max_page_size: 100,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub cache: CacheConfig,
    pub budget: BudgetConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub validation: ValidationConfig,
    /// Capacity of the operation history ring buffer.
    pub history_capacity: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            validation: ValidationConfig::default(),
            history_capacity: 1000,
        }
    }
}

impl GuardConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `QUOTAGUARD_CACHE_MAX_ENTRIES`
    /// - `QUOTAGUARD_CACHE_MAX_AGE_SECS`
    /// - `QUOTAGUARD_CACHE_CLEANUP_SECS`
    /// - `QUOTAGUARD_CACHE_POLICY` (`lru` or `lfu`)
    /// - `QUOTAGUARD_BUDGET_CEILING`
    /// - `QUOTAGUARD_BUDGET_COOLDOWN_MS`
    /// - `QUOTAGUARD_THROTTLE_SECS`
    /// - `QUOTAGUARD_MAX_RETRIES`
    /// - `QUOTAGUARD_RETRY_BASE_MS`
    /// - `QUOTAGUARD_RETRY_JITTER_MS`
    /// - `QUOTAGUARD_QUEUE_MAX_AGE_SECS`
    /// - `QUOTAGUARD_QUEUE_PACING_MS`
    /// - `QUOTAGUARD_HISTORY_CAPACITY`
    pub fn from_env() -> Self {
        let defaults = Self::new();

        Self {
            cache: CacheConfig {
                max_entries: env_parse("QUOTAGUARD_CACHE_MAX_ENTRIES")
                    .unwrap_or(defaults.cache.max_entries),
                max_age: env_parse("QUOTAGUARD_CACHE_MAX_AGE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cache.max_age),
                cleanup_interval: env_parse("QUOTAGUARD_CACHE_CLEANUP_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cache.cleanup_interval),
                eviction_policy: std::env::var("QUOTAGUARD_CACHE_POLICY")
                    .ok()
                    .and_then(|s| EvictionPolicy::parse(&s))
                    .unwrap_or(defaults.cache.eviction_policy),
                ..defaults.cache
            },
            budget: BudgetConfig {
                ceiling: env_parse("QUOTAGUARD_BUDGET_CEILING").unwrap_or(defaults.budget.ceiling),
                cooldown: env_parse("QUOTAGUARD_BUDGET_COOLDOWN_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.budget.cooldown),
                throttle_duration: env_parse("QUOTAGUARD_THROTTLE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.budget.throttle_duration),
            },
            retry: RetryConfig {
                max_retries: env_parse("QUOTAGUARD_MAX_RETRIES")
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: env_parse("QUOTAGUARD_RETRY_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                max_jitter: env_parse("QUOTAGUARD_RETRY_JITTER_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_jitter),
            },
            queue: QueueConfig {
                max_age: env_parse("QUOTAGUARD_QUEUE_MAX_AGE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.queue.max_age),
                pacing: env_parse("QUOTAGUARD_QUEUE_PACING_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.queue.pacing),
                ..defaults.queue
            },
            validation: defaults.validation,
            history_capacity: env_parse("QUOTAGUARD_HISTORY_CAPACITY")
                .unwrap_or(defaults.history_capacity),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - capacities (`cache.max_entries`, `budget.ceiling`, `history_capacity`) > 0
    /// - `adaptive_hit_rate_threshold` in [0.0, 1.0]
    /// - cooldown, max ages and intervals are positive
    pub fn validate(&self) -> GuardResult<()> {
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", &self.cache.max_entries, "must be greater than 0"));
        }

        if self.cache.max_age.is_zero() {
            return Err(invalid_duration("cache.max_age", self.cache.max_age));
        }

        if self.cache.cleanup_interval.is_zero() {
            return Err(invalid_duration("cache.cleanup_interval", self.cache.cleanup_interval));
        }

        let threshold = self.cache.adaptive_hit_rate_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "cache.adaptive_hit_rate_threshold",
                &threshold,
                "must be between 0.0 and 1.0",
            ));
        }

        if self.cache.adaptive_max_age_ceiling < self.cache.max_age {
            return Err(invalid(
                "cache.adaptive_max_age_ceiling",
                &format!("{:?}", self.cache.adaptive_max_age_ceiling),
                "must not be below cache.max_age",
            ));
        }

        if self.budget.ceiling == 0 {
            return Err(invalid("budget.ceiling", &self.budget.ceiling, "must be greater than 0"));
        }

        if self.budget.cooldown.is_zero() {
            return Err(invalid_duration("budget.cooldown", self.budget.cooldown));
        }

        if self.queue.max_age.is_zero() {
            return Err(invalid_duration("queue.max_age", self.queue.max_age));
        }

        if self.queue.drain_interval.is_zero() {
            return Err(invalid_duration("queue.drain_interval", self.queue.drain_interval));
        }

        if self.validation.max_key_length == 0 {
            return Err(invalid(
                "validation.max_key_length",
                &self.validation.max_key_length,
                "must be greater than 0",
            ));
        }

        if self.validation.max_page_size == 0 {
            return Err(invalid(
                "validation.max_page_size",
                &self.validation.max_page_size,
                "must be greater than 0",
            ));
        }

        if self.history_capacity == 0 {
            return Err(invalid("history_capacity", &self.history_capacity, "must be greater than 0"));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: &dyn std::fmt::Display, reason: &str) -> crate::GuardError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn invalid_duration(field: &str, value: Duration) -> crate::GuardError {
    invalid(field, &format!("{:?}", value), "must be positive")
}

// =============================================================================
// TESTS
// =============================================================================
