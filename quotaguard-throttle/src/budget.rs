//! Replenishing request budget.

use std::time::Duration;
use tokio::time::Instant;

/// Remaining calls, refilled by one unit per cooldown period.
///
/// `budget` stays within `0..=ceiling`.
#[derive(Debug, Clone)]
pub struct BudgetState {
    pub budget: u32,
    pub ceiling: u32,
    pub last_replenish_at: Instant,
}

impl BudgetState {
    /// A full budget.
    pub fn new(ceiling: u32, now: Instant) -> Self {
        Self {
            budget: ceiling,
            ceiling,
            last_replenish_at: now,
        }
    }

    /// Add one unit per whole `cooldown` elapsed since the last replenish,
    /// capped at the ceiling. Partial periods carry over. Returns units added.
    pub fn replenish(&mut self, now: Instant, cooldown: Duration) -> u32 {
        if self.budget >= self.ceiling {
            self.last_replenish_at = now;
            return 0;
        }

        let elapsed = now.saturating_duration_since(self.last_replenish_at);
        let units = elapsed.as_nanos() / cooldown.as_nanos().max(1);
        if units == 0 {
            return 0;
        }

        let missing = self.ceiling - self.budget;
        let added = units.min(missing as u128) as u32;
        self.budget += added;

        if self.budget >= self.ceiling {
            self.last_replenish_at = now;
        } else {
            self.last_replenish_at += cooldown * added;
        }
        added
    }

    /// Spend one unit. The replenish clock restarts at `now`.
    pub fn consume(&mut self, now: Instant) -> bool {
        if self.budget == 0 {
            return false;
        }
        self.budget -= 1;
        self.last_replenish_at = now;
        true
    }

    pub fn reset(&mut self, now: Instant) {
        self.budget = self.ceiling;
        self.last_replenish_at = now;
    }

    pub fn is_exhausted(&self) -> bool {
        self.budget == 0
    }
}
