//! quotaguard Throttle - Budget & Throttle Controller
//!
//! Paces calls to a quota-limited remote:
//! - a request budget that refills one unit per cooldown period
//! - a throttle window engaged when the remote reports a rate limit
//! - retries with jittered exponential backoff for transient failures
//! - a deferred queue drained once the gate opens again

pub mod backoff;
pub mod budget;
pub mod classify;
pub mod controller;
pub mod queue;
pub mod stats;
pub mod throttle;

pub use backoff::backoff_delay;
pub use budget::BudgetState;
pub use classify::classify;
pub use controller::{Admission, BudgetController, ExecutionReport};
pub use queue::{DrainSummary, QueuedRequest};
pub use stats::BudgetStats;
pub use throttle::ThrottleState;
