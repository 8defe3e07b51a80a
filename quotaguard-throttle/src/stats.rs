//! Controller counters and statistics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub throttled: u64,
    pub budget_rejections: u64,
    pub rate_limited: u64,
}

/// Latency of the most recent remote attempts.
#[derive(Debug, Clone, Default)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        total.as_secs_f64() * 1000.0 / self.samples.len() as f64
    }
}

/// Point-in-time view of the budget controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetStats {
    pub budget: u32,
    pub ceiling: u32,
    pub throttled: bool,
    pub throttle_reason: Option<String>,
    pub throttle_remaining: Option<Duration>,
    /// Executions that reached the gate.
    pub total_requests: u64,
    pub successes: u64,
    /// Executions that ended in a remote error.
    pub failures: u64,
    /// Backoff waits taken.
    pub retries: u64,
    /// Gate rejections while throttled.
    pub throttled_count: u64,
    /// Gate rejections for an empty budget.
    pub budget_rejections: u64,
    /// Remote rate-limit errors that engaged the throttle.
    pub rate_limited: u64,
    /// Rolling average over recent attempts.
    pub average_latency_ms: f64,
    pub queue_depth: usize,
    pub draining: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_rolls() {
        let mut window = LatencyWindow::default();
        assert_eq!(window.average_ms(), 0.0);

        for _ in 0..LATENCY_WINDOW {
            window.record(Duration::from_millis(10));
        }
        assert!((window.average_ms() - 10.0).abs() < 1e-9);

        for _ in 0..LATENCY_WINDOW {
            window.record(Duration::from_millis(30));
        }
        assert!((window.average_ms() - 30.0).abs() < 1e-9);
    }
}
