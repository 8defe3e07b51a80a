//! The data-access orchestrator.
//!
//! Every operation follows the same path: validate, consult the cache, obtain
//! the store handle, run the remote call through the budget controller, then
//! update the cache and the operation log.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use quotaguard_cache::{CacheEngine, CacheKey, CacheStatistics};
use quotaguard_core::{
    AccessOptions, GuardConfig, GuardError, GuardResult, HealthCheck, KeyDescriptor,
    OperationKind, RemoteError, RemoteStore, StoreHandle, StoreRef, StoredValue, Timestamp,
    ValidationConfig,
};
use quotaguard_throttle::{classify, BudgetController, BudgetStats, ExecutionReport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::history::{OperationLog, OperationRecord, OperationStats};
use crate::validation::{
    validate_key, validate_page_size, validate_prefix, validate_scope, validate_store_name,
    validate_value,
};

const COMPONENT: &str = "quotaguard";

/// Recent operations inspected by [`DataAccess::health`].
const HEALTH_WINDOW: usize = 10;

/// Fewer records than this never report unhealthy.
const HEALTH_MIN_SAMPLES: usize = 3;

/// Everything the layer counts, in one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub operations: OperationStats,
    pub cache: CacheStatistics,
    pub budget: BudgetStats,
    pub generated_at: Timestamp,
}

/// Result of [`DataAccess::write_deferred`].
#[derive(Debug)]
pub enum WriteOutcome {
    /// The write reached the remote store.
    Written,
    /// The gate was closed; the receiver yields the outcome once drained.
    Deferred(oneshot::Receiver<GuardResult<serde_json::Value>>),
}

/// Resilient access to one remote store service.
pub struct DataAccess<R: RemoteStore> {
    remote: Arc<R>,
    cache: Arc<CacheEngine>,
    controller: BudgetController,
    log: Mutex<OperationLog>,
    validation: ValidationConfig,
}

impl<R: RemoteStore + 'static> DataAccess<R> {
    /// Build the layer around `remote`. Fails on an invalid configuration.
    pub fn new(remote: R, config: GuardConfig) -> GuardResult<Self> {
        Self::with_remote(Arc::new(remote), config)
    }

    pub fn with_remote(remote: Arc<R>, config: GuardConfig) -> GuardResult<Self> {
        config.validate()?;
        Ok(Self {
            remote,
            cache: Arc::new(CacheEngine::new(config.cache.clone())),
            controller: BudgetController::from_config(&config),
            log: Mutex::new(OperationLog::new(config.history_capacity)),
            validation: config.validation,
        })
    }

    /// Spawn the periodic cache cleanup and deferred-queue drain tasks.
    ///
    /// Both stop on their own once this instance is dropped.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.cache.start_cleanup(),
            self.controller.start_queue_drainer(),
        ]
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub fn controller(&self) -> &BudgetController {
        &self.controller
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    fn lock_log(&self) -> MutexGuard<'_, OperationLog> {
        match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Recovered from poisoned operation log lock");
                poisoned.into_inner()
            }
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Read one key, from the cache when possible.
    ///
    /// Returns `Ok(None)` when the remote holds no value for the key. Absent
    /// keys are not cached.
    pub async fn read(
        &self,
        store: &str,
        key: &str,
        options: &AccessOptions,
    ) -> GuardResult<Option<StoredValue>> {
        self.validate_target(store, key, options)?;
        let store_ref = StoreRef::from_options(store, options);

        if let Some(value) = self.cache.get_value(&store_ref, key) {
            debug!(store = %store_ref, key, "Cache hit");
            return Ok(Some(value));
        }

        let kind = OperationKind::Read;
        let handle = self.open_handle(kind, &store_ref, key, false).await?;
        let report = self
            .controller
            .execute_with_report(kind.as_str(), || self.remote.get(&handle, key))
            .await;
        let value = self.finish(kind, &store_ref, key, report)?;

        if let Some(value) = &value {
            self.cache.put_value(store_ref, key, value.clone());
        }
        Ok(value)
    }

    /// Write one key. The cached value is replaced and cached key listings of
    /// the store are dropped.
    pub async fn write<T>(
        &self,
        store: &str,
        key: &str,
        value: &T,
        options: &AccessOptions,
    ) -> GuardResult<()>
    where
        T: Serialize + ?Sized,
    {
        self.validate_target(store, key, options)?;
        let value = validate_value(value, &self.validation)?;
        let store_ref = StoreRef::from_options(store, options);
        self.store_value(OperationKind::Write, store_ref, key, Some(value), options, false)
            .await
    }

    /// Delete one key: a write of no value.
    pub async fn delete(&self, store: &str, key: &str, options: &AccessOptions) -> GuardResult<()> {
        self.validate_target(store, key, options)?;
        let store_ref = StoreRef::from_options(store, options);
        self.store_value(OperationKind::Delete, store_ref, key, None, options, false)
            .await
    }

    /// One page of keys starting with `prefix`, from the cache when possible.
    pub async fn list_keys(
        &self,
        store: &str,
        prefix: &str,
        page_size: u32,
        options: &AccessOptions,
    ) -> GuardResult<Vec<KeyDescriptor>> {
        validate_store_name(store, &self.validation)?;
        validate_scope(options.scope.as_deref(), &self.validation)?;
        validate_prefix(prefix, &self.validation)?;
        validate_page_size(page_size, &self.validation)?;
        let store_ref = StoreRef::from_options(store, options);

        if let Some(keys) = self.cache.get_key_list(&store_ref, prefix, page_size) {
            debug!(store = %store_ref, prefix, "Key list cache hit");
            return Ok(keys);
        }

        let kind = OperationKind::List;
        let handle = self.open_handle(kind, &store_ref, prefix, false).await?;
        let report = self
            .controller
            .execute_with_report(kind.as_str(), || {
                self.remote.list_keys(&handle, prefix, page_size)
            })
            .await;
        let keys = self.finish(kind, &store_ref, prefix, report)?;

        self.cache
            .put_key_list(store_ref, prefix, page_size, keys.clone());
        Ok(keys)
    }

    /// Write now if the gate is open, otherwise park the write on the
    /// deferred queue.
    ///
    /// A write refused by the gate mid-flight is deferred too; a refusal before
    /// any remote attempt leaves no record in the operation log, while one
    /// after failed retries keeps the failed record. The store handle is
    /// opened when the queued write runs. Remote failures are returned as
    /// from [`write`](Self::write).
    pub async fn write_deferred<T>(
        &self,
        store: &str,
        key: &str,
        value: &T,
        options: &AccessOptions,
    ) -> GuardResult<WriteOutcome>
    where
        T: Serialize + ?Sized,
    {
        self.validate_target(store, key, options)?;
        let value = validate_value(value, &self.validation)?;
        let store_ref = StoreRef::from_options(store, options);

        if self.controller.can_proceed().is_allowed() {
            let written = self
                .store_value(
                    OperationKind::Write,
                    store_ref.clone(),
                    key,
                    Some(value.clone()),
                    options,
                    true,
                )
                .await;
            match written {
                Ok(()) => return Ok(WriteOutcome::Written),
                Err(error) if is_gate_rejection(&error) => {}
                Err(error) => return Err(error),
            }
        }

        info!(store = %store_ref, key, "Write deferred until the gate opens");

        let remote = Arc::clone(&self.remote);
        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        let options = options.clone();
        let receiver = self
            .controller
            .enqueue(OperationKind::Write.as_str(), move || {
                let remote = Arc::clone(&remote);
                let cache = Arc::clone(&cache);
                let store_ref = store_ref.clone();
                let key = key.clone();
                let value = value.clone();
                let options = options.clone();
                async move {
                    let handle = match cache.get_handle(&store_ref) {
                        Some(handle) => handle,
                        None => {
                            let handle = remote.open_store(&store_ref).await?;
                            cache.put_handle(handle.clone());
                            handle
                        }
                    };
                    remote
                        .set(
                            &handle,
                            &key,
                            Some(&value),
                            &options.user_ids,
                            &options.metadata,
                        )
                        .await?;
                    cache.put_value(
                        store_ref.clone(),
                        &key,
                        StoredValue {
                            value: value.clone(),
                            metadata: options.metadata,
                        },
                    );
                    cache.invalidate_key_lists(&store_ref);
                    Ok::<_, RemoteError>(value)
                }
            });

        Ok(WriteOutcome::Deferred(receiver))
    }

    // ========================================================================
    // Administration & telemetry
    // ========================================================================

    /// Drop every cached value and key listing. Store handles are kept.
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(removed, "Cache cleared");
        removed
    }

    /// Drop cached values and key listings of `store` in every scope.
    pub fn invalidate_store(&self, store: &str) -> usize {
        self.cache.invalidate_store(store)
    }

    pub fn statistics(&self) -> StatsSnapshot {
        StatsSnapshot {
            operations: self.lock_log().stats(),
            cache: self.cache.stats(),
            budget: self.controller.stats(),
            generated_at: chrono::Utc::now(),
        }
    }

    /// The `count` most recent records, newest first, optionally of one kind.
    pub fn operation_history(
        &self,
        count: usize,
        kind: Option<OperationKind>,
    ) -> Vec<OperationRecord> {
        self.lock_log().recent(count, kind)
    }

    /// Unhealthy when the recent operations all failed; degraded while
    /// throttled, out of budget, or holding deferred requests.
    pub fn health(&self) -> HealthCheck {
        let budget = self.controller.stats();
        let recent: Vec<bool> = self
            .lock_log()
            .tail(HEALTH_WINDOW)
            .map(|record| record.success)
            .collect();

        let check = if recent.len() >= HEALTH_MIN_SAMPLES && recent.iter().all(|ok| !ok) {
            HealthCheck::unhealthy(
                COMPONENT,
                format!("Last {} operations failed", recent.len()),
            )
        } else if budget.throttled {
            HealthCheck::degraded(
                COMPONENT,
                format!(
                    "Throttled: {}",
                    budget.throttle_reason.as_deref().unwrap_or("unknown reason")
                ),
            )
        } else if budget.budget == 0 {
            HealthCheck::degraded(COMPONENT, "Request budget exhausted")
        } else if budget.queue_depth > 0 {
            HealthCheck::degraded(
                COMPONENT,
                format!("{} deferred requests queued", budget.queue_depth),
            )
        } else {
            HealthCheck::healthy(COMPONENT)
        };

        check
            .with_metadata("budget", json!(budget.budget))
            .with_metadata("queue_depth", json!(budget.queue_depth))
            .with_metadata("cache_hit_rate", json!(self.cache.stats().hit_rate()))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn validate_target(&self, store: &str, key: &str, options: &AccessOptions) -> GuardResult<()> {
        let checked = validate_store_name(store, &self.validation)
            .and_then(|_| validate_scope(options.scope.as_deref(), &self.validation))
            .and_then(|_| validate_key(key, &self.validation));
        if let Err(error) = &checked {
            debug!(store, key, error = %error, "Rejected invalid input");
        }
        checked.map_err(GuardError::from)
    }

    /// Cached handle for `store`, opened on first use.
    ///
    /// Opening spends no budget but still needs the gate open. With
    /// `deferrable` set, a gate rejection is returned without being logged.
    async fn open_handle(
        &self,
        kind: OperationKind,
        store: &StoreRef,
        key: &str,
        deferrable: bool,
    ) -> GuardResult<StoreHandle> {
        if let Some(handle) = self.cache.get_handle(store) {
            return Ok(handle);
        }

        if let Some(rejection) = self.controller.can_proceed().into_error() {
            debug!(store = %store, reason = %rejection.kind(), "Store open rejected by gate");
            if deferrable {
                return Err(rejection);
            }
            let report: ExecutionReport<StoreHandle> = ExecutionReport {
                result: Err(rejection),
                attempts: 0,
                latency: Duration::ZERO,
            };
            return self.finish(kind, store, key, report);
        }

        let started = Instant::now();
        match self.remote.open_store(store).await {
            Ok(handle) => {
                debug!(store = %store, "Opened store");
                self.cache.put_handle(handle.clone());
                Ok(handle)
            }
            Err(error) => {
                let report: ExecutionReport<StoreHandle> = ExecutionReport {
                    result: Err(GuardError::Remote {
                        kind: classify(&error),
                        message: error.message,
                        attempts: 1,
                    }),
                    attempts: 1,
                    latency: started.elapsed(),
                };
                self.finish(kind, store, key, report)
            }
        }
    }

    /// With `deferrable` set, a gate rejection before any remote attempt is
    /// returned without being logged, since the caller queues the write.
    async fn store_value(
        &self,
        kind: OperationKind,
        store_ref: StoreRef,
        key: &str,
        value: Option<serde_json::Value>,
        options: &AccessOptions,
        deferrable: bool,
    ) -> GuardResult<()> {
        let handle = self.open_handle(kind, &store_ref, key, deferrable).await?;
        let report = self
            .controller
            .execute_with_report(kind.as_str(), || {
                self.remote.set(
                    &handle,
                    key,
                    value.as_ref(),
                    &options.user_ids,
                    &options.metadata,
                )
            })
            .await;
        if deferrable
            && report.attempts == 0
            && report.result.as_ref().is_err_and(is_gate_rejection)
        {
            return report.result;
        }
        self.finish(kind, &store_ref, key, report)?;

        match value {
            Some(value) => {
                self.cache.put_value(
                    store_ref.clone(),
                    key,
                    StoredValue {
                        value,
                        metadata: options.metadata.clone(),
                    },
                );
            }
            None => {
                self.cache
                    .invalidate_key(&CacheKey::value(store_ref.clone(), key));
            }
        }
        self.cache.invalidate_key_lists(&store_ref);
        Ok(())
    }

    /// Log the terminal outcome and hand back its result.
    fn finish<T>(
        &self,
        kind: OperationKind,
        store: &StoreRef,
        key: &str,
        report: ExecutionReport<T>,
    ) -> GuardResult<T> {
        let record = match &report.result {
            Ok(_) => OperationRecord::success(kind, store, key, report.attempts, report.latency),
            Err(error) => {
                warn!(
                    operation = %kind,
                    store = %store,
                    key,
                    attempts = report.attempts,
                    error_kind = %error.kind(),
                    error = %error,
                    "Operation failed"
                );
                OperationRecord::failure(
                    kind,
                    store,
                    key,
                    report.attempts,
                    report.latency,
                    error.kind(),
                    error.to_string(),
                )
            }
        };
        self.lock_log().push(record);
        report.result
    }
}

fn is_gate_rejection(error: &GuardError) -> bool {
    matches!(
        error,
        GuardError::BudgetExceeded { .. } | GuardError::Throttled { .. }
    )
}

impl<R: RemoteStore> std::fmt::Debug for DataAccess<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("cache", &self.cache)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
