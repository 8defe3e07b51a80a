//! Retry delays.

use quotaguard_core::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential part of the delay after the zero-based `attempt` failed.
pub fn exponential_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Uniform jitter in `[0, max)`.
pub fn jitter(max: Duration) -> Duration {
    let max_nanos = max.as_nanos().min(u64::MAX as u128) as u64;
    if max_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..max_nanos))
}

/// Delay to wait before the attempt following the zero-based `attempt`.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    exponential_delay(attempt, config.base_delay).saturating_add(jitter(config.max_jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles() {
        let base = Duration::from_secs(1);
        assert_eq!(exponential_delay(0, base), Duration::from_secs(1));
        assert_eq!(exponential_delay(1, base), Duration::from_secs(2));
        assert_eq!(exponential_delay(3, base), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_saturates() {
        let delay = exponential_delay(64, Duration::from_secs(1));
        assert!(delay >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_zero_jitter() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
