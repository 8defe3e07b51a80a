//! Deferred request queue.

use futures_util::future::BoxFuture;
use quotaguard_core::{GuardResult, RemoteError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A deferred remote call, callable again on retry.
pub type QueuedOperation =
    Box<dyn FnMut() -> BoxFuture<'static, Result<serde_json::Value, RemoteError>> + Send>;

/// A request waiting for the budget or throttle gate to open.
pub struct QueuedRequest {
    /// Telemetry tag.
    pub kind: String,
    pub operation: QueuedOperation,
    pub enqueued_at: Instant,
    /// Receives the outcome. A dropped receiver is ignored.
    pub reply: oneshot::Sender<GuardResult<serde_json::Value>>,
}

impl QueuedRequest {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Deliver the outcome; the caller may have stopped waiting.
    pub fn respond(self, result: GuardResult<serde_json::Value>) {
        let _ = self.reply.send(result);
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("kind", &self.kind)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Requests handed to the executor.
    pub executed: usize,
    /// Requests discarded for exceeding the maximum queue age.
    pub expired: usize,
    /// Requests still queued because the gate closed again.
    pub deferred: usize,
}
