//! Budget & throttle controller.
//!
//! Gates every remote call on the throttle window and the replenishing
//! budget, retries transient failures with jittered exponential backoff,
//! and parks deferred requests until the gate opens again.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use quotaguard_core::{
    BudgetConfig, ErrorKind, GuardConfig, GuardError, GuardResult, QueueConfig, RemoteError,
    RetryConfig,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backoff::backoff_delay;
use crate::budget::BudgetState;
use crate::classify::classify;
use crate::queue::{DrainSummary, QueuedRequest};
use crate::stats::{BudgetStats, Counters, LatencyWindow};
use crate::throttle::ThrottleState;

/// Shortest period the drain task will tick at.
const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// Verdict of the budget and throttle gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allowed,
    Throttled { reason: String, retry_after: Duration },
    BudgetExceeded { remaining: u32, ceiling: u32 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Reason code: `OK`, `THROTTLED` or `BUDGET_EXCEEDED`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Allowed => "OK",
            Self::Throttled { .. } => ErrorKind::Throttled.as_str(),
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded.as_str(),
        }
    }

    pub fn message(&self) -> String {
        match self.clone().into_error() {
            Some(error) => error.to_string(),
            None => "Request allowed".to_string(),
        }
    }

    /// The rejection as an error; `None` when allowed.
    pub fn into_error(self) -> Option<GuardError> {
        match self {
            Self::Allowed => None,
            Self::Throttled {
                reason,
                retry_after,
            } => Some(GuardError::Throttled {
                reason,
                retry_after,
            }),
            Self::BudgetExceeded { remaining, ceiling } => {
                Some(GuardError::BudgetExceeded { remaining, ceiling })
            }
        }
    }
}

/// Terminal outcome of [`BudgetController::execute_with_report`].
#[derive(Debug)]
pub struct ExecutionReport<T> {
    pub result: GuardResult<T>,
    /// Remote attempts made; zero when the gate rejected the first one.
    pub attempts: u32,
    /// Wall time including backoff waits.
    pub latency: Duration,
}

struct ControllerState {
    budget: BudgetState,
    throttle: ThrottleState,
    counters: Counters,
    latency: LatencyWindow,
    queue: VecDeque<QueuedRequest>,
}

struct Inner {
    state: Mutex<ControllerState>,
    draining: AtomicBool,
    budget: BudgetConfig,
    retry: RetryConfig,
    queue: QueueConfig,
}

/// Clears the draining flag when a drain ends, including on cancellation.
struct DrainFlag<'a>(&'a AtomicBool);

impl<'a> DrainFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared request gate. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct BudgetController {
    inner: Arc<Inner>,
}

impl BudgetController {
    pub fn new(budget: BudgetConfig, retry: RetryConfig, queue: QueueConfig) -> Self {
        let now = Instant::now();
        let queue = QueueConfig {
            drain_interval: queue.drain_interval.max(MIN_DRAIN_INTERVAL),
            ..queue
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ControllerState {
                    budget: BudgetState::new(budget.ceiling, now),
                    throttle: ThrottleState::default(),
                    counters: Counters::default(),
                    latency: LatencyWindow::default(),
                    queue: VecDeque::new(),
                }),
                draining: AtomicBool::new(false),
                budget,
                retry,
                queue,
            }),
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(
            config.budget.clone(),
            config.retry.clone(),
            config.queue.clone(),
        )
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, ControllerState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(op, "Recovered from poisoned controller lock");
                poisoned.into_inner()
            }
        }
    }

    /// Gate check under the lock. The flag reports an elapsed throttle that was cleared.
    fn admit(&self, state: &mut ControllerState, now: Instant) -> (Admission, bool) {
        let mut cleared = false;
        if state.throttle.active {
            if let Some(retry_after) = state.throttle.remaining(now) {
                let reason = state.throttle.reason.clone().unwrap_or_default();
                return (Admission::Throttled { reason, retry_after }, false);
            }
            state.throttle.clear();
            cleared = true;
            info!("Throttle window elapsed");
        }

        state.budget.replenish(now, self.inner.budget.cooldown);
        if state.budget.is_exhausted() {
            let admission = Admission::BudgetExceeded {
                remaining: state.budget.budget,
                ceiling: state.budget.ceiling,
            };
            return (admission, cleared);
        }

        (Admission::Allowed, cleared)
    }

    // ========================================================================
    // Gate
    // ========================================================================

    /// Check the gate without spending budget.
    ///
    /// An elapsed throttle is cleared here, which schedules a queue drain.
    pub fn can_proceed(&self) -> Admission {
        let now = Instant::now();
        let (admission, cleared) = {
            let mut state = self.lock("can_proceed");
            self.admit(&mut state, now)
        };
        if cleared {
            self.schedule_drain();
        }
        admission
    }

    /// Spend one unit of budget. Returns false when none is left.
    pub fn consume(&self) -> bool {
        self.lock("consume").budget.consume(Instant::now())
    }

    /// Check the gate and, if open, spend one unit under the same lock.
    pub fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let (admission, cleared) = {
            let mut guard = self.lock("try_acquire");
            let state = &mut *guard;
            let (admission, cleared) = self.admit(state, now);
            if admission.is_allowed() {
                state.budget.consume(now);
            }
            (admission, cleared)
        };
        if cleared {
            self.schedule_drain();
        }
        admission
    }

    /// Engage (or overwrite) the throttle window.
    pub fn set_throttle(&self, duration: Duration, reason: impl Into<String>) {
        let reason = reason.into();
        self.lock("set_throttle")
            .throttle
            .engage(Instant::now(), duration, reason.clone());
        warn!(
            reason = %reason,
            duration_secs = duration.as_secs_f64(),
            "Throttle engaged"
        );
    }

    /// Lift the throttle immediately and drain the deferred queue.
    pub fn clear_throttle(&self) {
        let was_active = {
            let mut state = self.lock("clear_throttle");
            let was_active = state.throttle.active;
            state.throttle.clear();
            was_active
        };
        if was_active {
            info!("Throttle cleared");
        }
        self.schedule_drain();
    }

    pub fn is_throttled(&self) -> bool {
        self.lock("is_throttled")
            .throttle
            .remaining(Instant::now())
            .is_some()
    }

    /// Refill the budget to its ceiling.
    pub fn reset_budget(&self) {
        self.lock("reset_budget").budget.reset(Instant::now());
        info!(ceiling = self.inner.budget.ceiling, "Budget reset");
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run a remote operation through the gate with retries.
    pub async fn execute<T, F, Fut>(&self, kind: &str, operation: F) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.execute_with_report(kind, operation).await.result
    }

    /// Like [`execute`](Self::execute), also reporting attempts and latency.
    ///
    /// Every attempt passes the gate and spends one unit. A gate rejection
    /// ends the call immediately. Failures classified as retryable are tried
    /// again up to `max_retries` times, waiting `base * 2^i` plus jitter after
    /// the zero-based attempt `i`. A rate-limit failure engages the throttle
    /// and is only retried when the backoff outlasts the throttle window.
    pub async fn execute_with_report<T, F, Fut>(
        &self,
        kind: &str,
        mut operation: F,
    ) -> ExecutionReport<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let started = Instant::now();
        self.lock("execute").counters.total_requests += 1;
        let mut attempts = 0u32;

        loop {
            let admission = self.try_acquire();
            if let Some(rejection) = admission.clone().into_error() {
                {
                    let mut state = self.lock("execute");
                    match admission {
                        Admission::Throttled { .. } => state.counters.throttled += 1,
                        Admission::BudgetExceeded { .. } => state.counters.budget_rejections += 1,
                        Admission::Allowed => {}
                    }
                    if attempts > 0 {
                        state.counters.failures += 1;
                    }
                }
                debug!(kind, attempts, reason = admission.reason(), "Remote call rejected by gate");
                return ExecutionReport {
                    result: Err(rejection),
                    attempts,
                    latency: started.elapsed(),
                };
            }

            attempts += 1;
            let call_started = Instant::now();
            let outcome = operation().await;
            self.lock("execute").latency.record(call_started.elapsed());

            let error = match outcome {
                Ok(value) => {
                    self.lock("execute").counters.successes += 1;
                    return ExecutionReport {
                        result: Ok(value),
                        attempts,
                        latency: started.elapsed(),
                    };
                }
                Err(error) => error,
            };

            let error_kind = classify(&error);
            let engaged = error_kind == ErrorKind::Throttled;
            if engaged {
                self.lock("execute").counters.rate_limited += 1;
                self.set_throttle(self.inner.budget.throttle_duration, error.message.clone());
            }

            // A retry that lands inside the throttle window would only be refused.
            let retry_delay = (error_kind.is_retryable() && attempts <= self.inner.retry.max_retries)
                .then(|| backoff_delay(attempts - 1, &self.inner.retry))
                .filter(|delay| !engaged || *delay >= self.inner.budget.throttle_duration);

            if let Some(delay) = retry_delay {
                self.lock("execute").counters.retries += 1;
                warn!(
                    kind,
                    attempt = attempts,
                    error_kind = %error_kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Remote call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            self.lock("execute").counters.failures += 1;
            warn!(
                kind,
                attempts,
                error_kind = %error_kind,
                error = %error,
                "Remote call failed"
            );
            return ExecutionReport {
                result: Err(GuardError::Remote {
                    kind: error_kind,
                    message: error.message,
                    attempts,
                }),
                attempts,
                latency: started.elapsed(),
            };
        }
    }

    // ========================================================================
    // Deferred queue
    // ========================================================================

    /// Park a request until the next drain. The receiver gets its outcome;
    /// dropping the receiver discards it.
    pub fn enqueue<F, Fut>(
        &self,
        kind: impl Into<String>,
        mut operation: F,
    ) -> oneshot::Receiver<GuardResult<serde_json::Value>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value, RemoteError>> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let request = QueuedRequest {
            kind: kind.into(),
            operation: Box::new(move || operation().boxed()),
            enqueued_at: Instant::now(),
            reply,
        };

        let kind = request.kind.clone();
        let depth = {
            let mut state = self.lock("enqueue");
            state.queue.push_back(request);
            state.queue.len()
        };
        debug!(kind = %kind, depth, "Request deferred");
        receiver
    }

    pub fn queue_depth(&self) -> usize {
        self.lock("queue_depth").queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Execute queued requests in FIFO order.
    ///
    /// Requests older than the maximum queue age are answered with
    /// `QueueTimeout` without running. Draining pauses, keeping the request,
    /// when the gate closes. A drain started while another runs does nothing.
    pub async fn drain_queue(&self) -> DrainSummary {
        let Some(_flag) = DrainFlag::acquire(&self.inner.draining) else {
            debug!("Queue drain already running");
            return DrainSummary::default();
        };

        let mut summary = DrainSummary::default();
        loop {
            let next = self.lock("drain_queue").queue.pop_front();
            let Some(mut request) = next else {
                break;
            };

            let now = Instant::now();
            if request.is_expired(now, self.inner.queue.max_age) {
                let age = request.age(now);
                warn!(
                    kind = %request.kind,
                    age_secs = age.as_secs(),
                    "Discarding expired queued request"
                );
                let operation = request.kind.clone();
                request.respond(Err(GuardError::QueueTimeout { operation, age }));
                summary.expired += 1;
                continue;
            }

            if !self.can_proceed().is_allowed() {
                let depth = {
                    let mut state = self.lock("drain_queue");
                    state.queue.push_front(request);
                    state.queue.len()
                };
                summary.deferred = depth;
                debug!(depth, "Gate closed, queue drain paused");
                break;
            }

            let kind = request.kind.clone();
            let operation = &mut request.operation;
            let result = self.execute(&kind, || operation()).await;
            request.respond(result);
            summary.executed += 1;

            if self.queue_depth() > 0 {
                tokio::time::sleep(self.inner.queue.pacing).await;
            }
        }

        if summary != DrainSummary::default() {
            info!(
                executed = summary.executed,
                expired = summary.expired,
                deferred = summary.deferred,
                "Deferred queue drained"
            );
        }
        summary
    }

    /// Spawn a drain if requests are waiting and a runtime is available.
    fn schedule_drain(&self) {
        if self.queue_depth() == 0 || self.is_draining() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let controller = self.clone();
                handle.spawn(async move {
                    controller.drain_queue().await;
                });
            }
            Err(_) => debug!("No runtime for queue drain, requests stay queued"),
        }
    }

    /// Spawn the periodic drain task.
    ///
    /// The task holds a weak reference and stops once every controller handle
    /// is dropped. Must be called from within a tokio runtime.
    pub fn start_queue_drainer(&self) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.queue.drain_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let controller = BudgetController { inner };
                if controller.queue_depth() > 0 {
                    controller.drain_queue().await;
                }
            }

            debug!("Queue drain task stopped");
        })
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Current budget after replenishment.
    pub fn budget(&self) -> u32 {
        let mut state = self.lock("budget");
        state.budget.replenish(Instant::now(), self.inner.budget.cooldown);
        state.budget.budget
    }

    pub fn stats(&self) -> BudgetStats {
        let now = Instant::now();
        let draining = self.is_draining();
        let mut guard = self.lock("stats");
        let state = &mut *guard;
        state.budget.replenish(now, self.inner.budget.cooldown);

        let throttle_remaining = state.throttle.remaining(now);
        let counters = state.counters;
        BudgetStats {
            budget: state.budget.budget,
            ceiling: state.budget.ceiling,
            throttled: throttle_remaining.is_some(),
            throttle_reason: throttle_remaining.and(state.throttle.reason.clone()),
            throttle_remaining,
            total_requests: counters.total_requests,
            successes: counters.successes,
            failures: counters.failures,
            retries: counters.retries,
            throttled_count: counters.throttled,
            budget_rejections: counters.budget_rejections,
            rate_limited: counters.rate_limited,
            average_latency_ms: state.latency.average_ms(),
            queue_depth: state.queue.len(),
            draining,
        }
    }

    pub fn budget_config(&self) -> &BudgetConfig {
        &self.inner.budget
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    pub fn queue_config(&self) -> &QueueConfig {
        &self.inner.queue
    }
}

impl std::fmt::Debug for BudgetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetController")
            .field("ceiling", &self.inner.budget.ceiling)
            .field("queue_depth", &self.queue_depth())
            .field("draining", &self.is_draining())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn controller(ceiling: u32) -> BudgetController {
        BudgetController::new(
            BudgetConfig {
                ceiling,
                ..BudgetConfig::default()
            },
            RetryConfig::default(),
            QueueConfig::default(),
        )
    }

    fn counting_failure(
        calls: &Arc<AtomicU32>,
        message: &'static str,
    ) -> impl FnMut() -> std::future::Ready<Result<(), RemoteError>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(RemoteError::new(message)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_gate() {
        let gate = controller(2);
        assert!(gate.can_proceed().is_allowed());
        assert!(gate.consume());
        assert!(gate.consume());
        assert!(!gate.consume());

        let admission = gate.can_proceed();
        assert_eq!(admission.reason(), "BUDGET_EXCEEDED");
        assert_eq!(
            admission,
            Admission::BudgetExceeded {
                remaining: 0,
                ceiling: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_replenish_after_five_seconds() {
        let gate = controller(100);
        for _ in 0..100 {
            assert!(gate.try_acquire().is_allowed());
        }
        assert_eq!(gate.budget(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        let stats = gate.stats();
        assert!(stats.budget <= 5);
        assert_eq!(stats.budget, 5);
        assert_eq!(stats.ceiling, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_gating_until_window_ends() {
        let gate = controller(10);
        gate.set_throttle(Duration::from_secs(10), "maintenance");

        tokio::time::advance(Duration::from_secs(9)).await;
        match gate.can_proceed() {
            Admission::Throttled {
                reason,
                retry_after,
            } => {
                assert_eq!(reason, "maintenance");
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected throttled, got {:?}", other),
        }
        assert!(gate.is_throttled());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(gate.can_proceed().is_allowed());
        assert!(!gate.stats().throttled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_success_records_counters() {
        let gate = controller(10);
        let report = gate
            .execute_with_report("READ", || async { Ok::<_, RemoteError>(json!(42)) })
            .await;

        assert_eq!(report.result.unwrap(), json!(42));
        assert_eq!(report.attempts, 1);

        let stats = gate.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.budget, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_attempted_max_retries_plus_one() {
        let gate = controller(60);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let report = gate
            .execute_with_report("WRITE", counting_failure(&calls, "connection reset by peer"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.attempts, 4);
        let error = report.result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NetworkError);
        assert!(matches!(error, GuardError::Remote { attempts: 4, .. }));

        // 1s + 2s + 4s of backoff plus up to 1s jitter each.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7));
        assert!(waited < Duration::from_secs(10));

        let stats = gate.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let gate = controller(60);
        let calls = Arc::new(AtomicU32::new(0));

        let report = gate
            .execute_with_report("READ", counting_failure(&calls, "Key does not exist"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.result.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_is_not_retried() {
        let gate = controller(60);
        let calls = Arc::new(AtomicU32::new(0));

        let report = gate
            .execute_with_report("READ", counting_failure(&calls, "kaboom"))
            .await;

        assert_eq!(report.attempts, 1);
        assert_eq!(report.result.unwrap_err().kind(), ErrorKind::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_engages_throttle() {
        let gate = controller(60);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let report = gate
            .execute_with_report("WRITE", counting_failure(&calls, "HTTP 429 Too Many Requests"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.result.unwrap_err().kind(), ErrorKind::Throttled);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let stats = gate.stats();
        assert!(stats.throttled);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.throttled_count, 0);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.throttle_reason.as_deref(), Some("HTTP 429 Too Many Requests"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_when_window_shorter_than_backoff() {
        let gate = BudgetController::new(
            BudgetConfig {
                throttle_duration: Duration::from_millis(10),
                ..BudgetConfig::default()
            },
            RetryConfig::default(),
            QueueConfig::default(),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let report = gate
            .execute_with_report("WRITE", move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(if attempt == 0 {
                    Err(RemoteError::new("quota exceeded"))
                } else {
                    Ok(json!("stored"))
                })
            })
            .await;

        assert_eq!(report.attempts, 2);
        assert_eq!(report.result.unwrap(), json!("stored"));
        assert_eq!(gate.stats().retries, 1);
        assert!(!gate.is_throttled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_rejection_skips_operation() {
        let gate = controller(1);
        gate.execute("READ", || async { Ok::<_, RemoteError>(()) })
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let report = gate
            .execute_with_report("READ", counting_failure(&calls, "unused"))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.attempts, 0);
        assert_eq!(report.result.unwrap_err().kind(), ErrorKind::BudgetExceeded);
        assert_eq!(gate.stats().budget_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_never_double_spends() {
        let gate = controller(10);
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move { gate.try_acquire().is_allowed() }));
        }

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_runs_fifo() {
        let gate = controller(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            receivers.push(gate.enqueue("WRITE", move || {
                order.lock().unwrap().push(i);
                std::future::ready(Ok(json!(i)))
            }));
        }
        assert_eq!(gate.queue_depth(), 3);

        let summary = gate.drain_queue().await;
        assert_eq!(summary.executed, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap().unwrap(), json!(i));
        }
        assert_eq!(gate.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_request_times_out() {
        let gate = controller(10);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let rx = gate.enqueue("WRITE", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(json!(null)))
        });

        tokio::time::advance(Duration::from_secs(301)).await;
        let summary = gate.drain_queue().await;

        assert_eq!(summary.expired, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let error = rx.await.unwrap().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(matches!(error, GuardError::QueueTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_drain_is_noop() {
        let gate = controller(10);
        let _rx = gate.enqueue("WRITE", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(1))
        });

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.drain_queue().await })
        };
        tokio::task::yield_now().await;
        assert!(gate.is_draining());

        assert_eq!(gate.drain_queue().await, DrainSummary::default());
        assert_eq!(first.await.unwrap().executed, 1);
        assert!(!gate.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_pauses_when_gate_closed() {
        let gate = controller(1);
        assert!(gate.consume());
        let _rx = gate.enqueue("WRITE", || std::future::ready(Ok(json!(1))));

        let summary = gate.drain_queue().await;
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.deferred, 1);
        assert_eq!(gate.queue_depth(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_throttle_drains_queue() {
        let gate = controller(10);
        gate.set_throttle(Duration::from_secs(60), "quota");
        let rx = gate.enqueue("WRITE", || std::future::ready(Ok(json!("done"))));

        gate.clear_throttle();
        assert_eq!(rx.await.unwrap().unwrap(), json!("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_throttle_drains_queue_on_next_check() {
        let gate = controller(10);
        gate.set_throttle(Duration::from_secs(5), "quota");
        let rx = gate.enqueue("WRITE", || std::future::ready(Ok(json!("late"))));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(gate.can_proceed().is_allowed());
        assert_eq!(rx.await.unwrap().unwrap(), json!("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_drainer_runs_when_budget_returns() {
        let gate = controller(1);
        assert!(gate.consume());
        let rx = gate.enqueue("WRITE", || std::future::ready(Ok(json!("ok"))));
        let _task = gate.start_queue_drainer();

        let outcome = tokio::time::timeout(Duration::from_secs(30), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.unwrap(), json!("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_drain_interval_is_clamped() {
        let gate = BudgetController::new(
            BudgetConfig::default(),
            RetryConfig::default(),
            QueueConfig {
                drain_interval: Duration::ZERO,
                ..QueueConfig::default()
            },
        );
        assert_eq!(gate.queue_config().drain_interval, MIN_DRAIN_INTERVAL);

        gate.set_throttle(Duration::from_secs(1), "maintenance");
        let rx = gate.enqueue("WRITE", || std::future::ready(Ok(json!("ok"))));
        let _task = gate.start_queue_drainer();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.unwrap(), json!("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_budget() {
        let gate = controller(3);
        gate.consume();
        gate.consume();
        gate.reset_budget();
        assert_eq!(gate.budget(), 3);
    }
}
