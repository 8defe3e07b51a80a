//! quotaguard Test Utilities
//!
//! Shared test infrastructure for the quotaguard workspace:
//! - An in-memory [`MockRemoteStore`] with scriptable failures and call counters
//! - Proptest generators for keys, values, options and configuration
//! - Fixtures for common scenarios
//! - Assertions on classified errors

pub use quotaguard_core::{
    AccessOptions, ErrorKind, EvictionPolicy, GuardConfig, GuardError, GuardResult,
    KeyDescriptor, Metadata, OperationKind, RemoteError, RemoteStore, StoreHandle, StoreRef,
    StoredValue, Timestamp,
};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK REMOTE STORE
// ============================================================================

/// Remote call kinds, for scripting failures and reading counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Open,
    Get,
    Set,
    List,
}

#[derive(Debug, Clone)]
struct FailurePlan {
    /// `None` fails every call.
    remaining: Option<usize>,
    message: String,
}

#[derive(Debug, Clone)]
struct MockRecord {
    value: serde_json::Value,
    metadata: Metadata,
    user_ids: Vec<u64>,
    version: u64,
    created_at: Timestamp,
    updated_at: Timestamp,
}

#[derive(Debug, Default)]
struct MockState {
    stores: Mutex<HashMap<StoreRef, BTreeMap<String, MockRecord>>>,
    failures: Mutex<HashMap<MockCall, FailurePlan>>,
    latency: Mutex<Duration>,
    open_calls: AtomicU64,
    get_calls: AtomicU64,
    set_calls: AtomicU64,
    list_calls: AtomicU64,
}

/// In-memory remote store for tests.
///
/// Clones share state, so a test can keep one clone for scripting and
/// inspection while the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct MockRemoteStore {
    state: Arc<MockState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without going through the remote API.
    pub fn insert(&self, store: &StoreRef, key: impl Into<String>, value: serde_json::Value) {
        let now = Utc::now();
        lock(&self.state.stores).entry(store.clone()).or_default().insert(
            key.into(),
            MockRecord {
                value,
                metadata: Metadata::new(),
                user_ids: Vec::new(),
                version: 1,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Current value of a key, bypassing failures and counters.
    pub fn value(&self, store: &StoreRef, key: &str) -> Option<serde_json::Value> {
        lock(&self.state.stores)
            .get(store)
            .and_then(|keys| keys.get(key))
            .map(|record| record.value.clone())
    }

    /// User ids stored with a key.
    pub fn user_ids(&self, store: &StoreRef, key: &str) -> Option<Vec<u64>> {
        lock(&self.state.stores)
            .get(store)
            .and_then(|keys| keys.get(key))
            .map(|record| record.user_ids.clone())
    }

    pub fn key_count(&self, store: &StoreRef) -> usize {
        lock(&self.state.stores).get(store).map_or(0, BTreeMap::len)
    }

    /// Fail the next `times` calls of `call` with `message`.
    pub fn fail_next(&self, call: MockCall, times: usize, message: impl Into<String>) {
        lock(&self.state.failures).insert(
            call,
            FailurePlan {
                remaining: Some(times),
                message: message.into(),
            },
        );
    }

    /// Fail every call of `call` with `message` until [`heal`](Self::heal).
    pub fn fail_always(&self, call: MockCall, message: impl Into<String>) {
        lock(&self.state.failures).insert(
            call,
            FailurePlan {
                remaining: None,
                message: message.into(),
            },
        );
    }

    /// Drop every scripted failure.
    pub fn heal(&self) {
        lock(&self.state.failures).clear();
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.state.latency) = latency;
    }

    fn counter(&self, call: MockCall) -> &AtomicU64 {
        match call {
            MockCall::Open => &self.state.open_calls,
            MockCall::Get => &self.state.get_calls,
            MockCall::Set => &self.state.set_calls,
            MockCall::List => &self.state.list_calls,
        }
    }

    /// Calls received of `call`, failed ones included.
    pub fn calls(&self, call: MockCall) -> u64 {
        self.counter(call).load(Ordering::SeqCst)
    }

    /// Calls received across all kinds.
    pub fn total_calls(&self) -> u64 {
        [MockCall::Open, MockCall::Get, MockCall::Set, MockCall::List]
            .into_iter()
            .map(|call| self.calls(call))
            .sum()
    }

    /// Count the call, wait the configured latency, then apply any scripted failure.
    async fn begin(&self, call: MockCall) -> Result<(), RemoteError> {
        self.counter(call).fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut failures = lock(&self.state.failures);
        let Some(plan) = failures.get_mut(&call) else {
            return Ok(());
        };
        let message = plan.message.clone();
        let remaining = plan.remaining;
        match remaining {
            None => Err(RemoteError::new(message)),
            Some(0) => {
                failures.remove(&call);
                Ok(())
            }
            Some(n) => {
                if n == 1 {
                    failures.remove(&call);
                } else {
                    plan.remaining = Some(n - 1);
                }
                Err(RemoteError::new(message))
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn open_store(&self, store: &StoreRef) -> Result<StoreHandle, RemoteError> {
        self.begin(MockCall::Open).await?;
        lock(&self.state.stores).entry(store.clone()).or_default();
        Ok(StoreHandle::new(store.clone(), format!("mock:{}", store)))
    }

    async fn get(
        &self,
        handle: &StoreHandle,
        key: &str,
    ) -> Result<Option<StoredValue>, RemoteError> {
        self.begin(MockCall::Get).await?;
        Ok(lock(&self.state.stores)
            .get(&handle.store)
            .and_then(|keys| keys.get(key))
            .map(|record| StoredValue {
                value: record.value.clone(),
                metadata: record.metadata.clone(),
            }))
    }

    async fn set(
        &self,
        handle: &StoreHandle,
        key: &str,
        value: Option<&serde_json::Value>,
        user_ids: &[u64],
        metadata: &Metadata,
    ) -> Result<(), RemoteError> {
        self.begin(MockCall::Set).await?;
        let mut stores = lock(&self.state.stores);
        let keys = stores.entry(handle.store.clone()).or_default();

        let Some(value) = value else {
            keys.remove(key);
            return Ok(());
        };

        let now = Utc::now();
        let record = keys.entry(key.to_string()).or_insert_with(|| MockRecord {
            value: serde_json::Value::Null,
            metadata: Metadata::new(),
            user_ids: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        });
        record.value = value.clone();
        record.metadata = metadata.clone();
        record.user_ids = user_ids.to_vec();
        record.version += 1;
        record.updated_at = now;
        Ok(())
    }

    async fn list_keys(
        &self,
        handle: &StoreHandle,
        prefix: &str,
        page_size: u32,
    ) -> Result<Vec<KeyDescriptor>, RemoteError> {
        self.begin(MockCall::List).await?;
        let stores = lock(&self.state.stores);
        let Some(keys) = stores.get(&handle.store) else {
            return Ok(Vec::new());
        };

        Ok(keys
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .take(page_size as usize)
            .map(|(name, record)| KeyDescriptor {
                name: name.clone(),
                version: Some(record.version.to_string()),
                metadata: record.metadata.clone(),
                user_ids: record.user_ids.clone(),
                created_at: Some(record.created_at),
                updated_at: Some(record.updated_at),
            })
            .collect())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for quotaguard inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a key made only of allowed characters.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.:/@-]{1,50}"
    }

    /// Generate a key containing at least one disallowed character.
    pub fn arb_invalid_key() -> impl Strategy<Value = String> {
        ("[A-Za-z0-9]{0,10}", "[ #$%&*?!]", "[A-Za-z0-9]{0,10}")
            .prop_map(|(head, bad, tail)| format!("{}{}{}", head, bad, tail))
    }

    /// Generate a store name.
    pub fn arb_store_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_]{0,30}"
    }

    /// Generate a small JSON document.
    pub fn arb_json_value() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z ]{0,20}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
                prop::collection::hash_map("[a-z]{1,8}", inner, 0..4)
                    .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
            ]
        })
    }

    /// Generate call options.
    pub fn arb_access_options() -> impl Strategy<Value = AccessOptions> {
        (
            prop::option::of("[a-z]{1,12}"),
            prop::collection::vec(any::<u64>(), 0..3),
        )
            .prop_map(|(scope, user_ids)| AccessOptions {
                scope,
                user_ids,
                metadata: Metadata::new(),
            })
    }

    /// Generate an OperationKind variant.
    pub fn arb_operation_kind() -> impl Strategy<Value = OperationKind> {
        prop_oneof![
            Just(OperationKind::Read),
            Just(OperationKind::Write),
            Just(OperationKind::Delete),
            Just(OperationKind::List),
        ]
    }

    /// Generate an EvictionPolicy variant.
    pub fn arb_eviction_policy() -> impl Strategy<Value = EvictionPolicy> {
        prop_oneof![Just(EvictionPolicy::Lru), Just(EvictionPolicy::Lfu)]
    }

    /// Generate a valid GuardConfig.
    pub fn arb_valid_config() -> impl Strategy<Value = GuardConfig> {
        (
            1usize..10_000,
            1u64..3600,
            arb_eviction_policy(),
            1u32..1000,
            1u64..10_000,
            0u32..6,
            1usize..5000,
        )
            .prop_map(
                |(max_entries, max_age_secs, policy, ceiling, cooldown_ms, max_retries, history)| {
                    let mut config = GuardConfig::new();
                    config.cache.max_entries = max_entries;
                    config.cache.max_age = Duration::from_secs(max_age_secs);
                    config.cache.adaptive_max_age_ceiling =
                        Duration::from_secs(max_age_secs.max(600));
                    config.cache.eviction_policy = policy;
                    config.budget.ceiling = ceiling;
                    config.budget.cooldown = Duration::from_millis(cooldown_ms);
                    config.retry.max_retries = max_retries;
                    config.history_capacity = history;
                    config
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// The default-scope store used across tests.
    pub fn player_store() -> StoreRef {
        StoreRef::new("PlayerData", quotaguard_core::DEFAULT_SCOPE)
    }

    /// Defaults with short retry delays so retry paths stay fast.
    pub fn fast_config() -> GuardConfig {
        let mut config = GuardConfig::new();
        config.retry.base_delay = Duration::from_millis(10);
        config.retry.max_jitter = Duration::from_millis(5);
        config.queue.pacing = Duration::from_millis(1);
        config
    }

    /// `fast_config` with a small budget.
    pub fn budget_config(ceiling: u32) -> GuardConfig {
        let mut config = fast_config();
        config.budget.ceiling = ceiling;
        config
    }

    /// A mock pre-seeded with `player_1` and `player_2` in [`player_store`].
    pub fn seeded_remote() -> MockRemoteStore {
        let remote = MockRemoteStore::new();
        remote.insert(&player_store(), "player_1", serde_json::json!({"coins": 100}));
        remote.insert(&player_store(), "player_2", serde_json::json!({"coins": 250}));
        remote
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on quotaguard results.

    use super::*;

    /// Assert that a GuardResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &GuardResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a GuardResult failed with the given kind.
    #[track_caller]
    pub fn assert_error_kind<T: std::fmt::Debug>(result: &GuardResult<T>, kind: ErrorKind) {
        match result {
            Err(error) => assert_eq!(error.kind(), kind, "Wrong error kind for {:?}", error),
            Ok(value) => panic!("Expected {} error, got Ok({:?})", kind, value),
        }
    }

    /// Assert that a GuardResult is an input validation failure.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &GuardResult<T>) {
        match result {
            Err(GuardError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn test_mock_roundtrip_and_counters() {
        let remote = MockRemoteStore::new();
        let handle = remote.open_store(&player_store()).await.unwrap();

        remote
            .set(&handle, "k", Some(&serde_json::json!(1)), &[7], &Metadata::new())
            .await
            .unwrap();
        let value = remote.get(&handle, "k").await.unwrap().unwrap();
        assert_eq!(value.value, serde_json::json!(1));
        assert_eq!(remote.user_ids(&player_store(), "k"), Some(vec![7]));

        remote.set(&handle, "k", None, &[], &Metadata::new()).await.unwrap();
        assert!(remote.get(&handle, "k").await.unwrap().is_none());

        assert_eq!(remote.calls(MockCall::Open), 1);
        assert_eq!(remote.calls(MockCall::Set), 2);
        assert_eq!(remote.calls(MockCall::Get), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let remote = seeded_remote();
        let handle = remote.open_store(&player_store()).await.unwrap();
        remote.fail_next(MockCall::Get, 2, "connection reset");

        assert!(remote.get(&handle, "player_1").await.is_err());
        assert!(remote.get(&handle, "player_1").await.is_err());
        assert!(remote.get(&handle, "player_1").await.unwrap().is_some());

        remote.fail_always(MockCall::List, "quota exceeded");
        assert!(remote.list_keys(&handle, "", 10).await.is_err());
        remote.heal();
        assert_eq!(remote.list_keys(&handle, "player_", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_keys_prefix_and_order() {
        let remote = seeded_remote();
        remote.insert(&player_store(), "guild_1", serde_json::json!({}));
        let handle = remote.open_store(&player_store()).await.unwrap();

        let names: Vec<String> = remote
            .list_keys(&handle, "player_", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["player_1", "player_2"]);
    }
}
