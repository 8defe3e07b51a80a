//! The cache engine.
//!
//! One mutex guards the value/key-list map together with its counters, so a
//! `put` that has to evict can never race another `put` past capacity. Store
//! handles live in a separate map: they never expire and do not count toward
//! capacity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use quotaguard_core::{
    CacheConfig, EvictionPolicy, KeyDescriptor, Metadata, StoreHandle, StoreRef, StoredValue,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::entry::{CacheEntry, CacheKey, CachePayload, EntryKind, HandleEntry};
use crate::policy::select_victim;
use crate::stats::CacheStatistics;

/// Shortest period the cleanup task will tick at.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    policy: EvictionPolicy,
    max_age: Duration,
    seq: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&CacheKey, &CacheEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, entry| !predicate(key, entry));
        before - self.entries.len()
    }
}

/// Bounded, expiring in-memory cache for values, key listings and handles.
pub struct CacheEngine {
    state: Mutex<CacheState>,
    handles: Mutex<HashMap<StoreRef, HandleEntry>>,
    config: CacheConfig,
}

impl CacheEngine {
    pub fn new(config: CacheConfig) -> Self {
        let config = CacheConfig {
            max_entries: config.max_entries.max(1),
            cleanup_interval: config.cleanup_interval.max(MIN_CLEANUP_INTERVAL),
            ..config
        };
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                policy: config.eviction_policy,
                max_age: config.max_age,
                seq: 0,
            }),
            handles: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock_state(&self, op: &'static str) -> MutexGuard<'_, CacheState> {
        recover(&self.state, op)
    }

    fn lock_handles(&self, op: &'static str) -> MutexGuard<'_, HashMap<StoreRef, HandleEntry>> {
        recover(&self.handles, op)
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Insert or overwrite an entry, evicting one victim first when a new key
    /// would exceed capacity. Returns the evicted key, if any.
    pub fn put(&self, key: CacheKey, payload: CachePayload, metadata: Metadata) -> Option<CacheKey> {
        let now = Instant::now();
        let mut guard = self.lock_state("put");
        let state = &mut *guard;
        let seq = state.next_seq();

        let mut evicted = None;
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            if let Some(victim) = select_victim(state.policy, &state.entries).cloned() {
                state.entries.remove(&victim);
                state.evictions += 1;
                debug!(victim = %victim, policy = state.policy.as_str(), "Evicted cache entry");
                evicted = Some(victim);
            }
        }

        state
            .entries
            .insert(key, CacheEntry::new(payload, metadata, now, seq));
        evicted
    }

    /// Look up an entry. Expired entries are removed and count as misses.
    pub fn get(&self, key: &CacheKey) -> Option<(CachePayload, Metadata)> {
        let now = Instant::now();
        let mut guard = self.lock_state("get");
        let state = &mut *guard;

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(now, state.max_age),
            None => {
                state.misses += 1;
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            state.misses += 1;
            debug!(key = %key, "Dropped expired cache entry on lookup");
            return None;
        }

        let seq = state.next_seq();
        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.touch(now, seq);
        Some((entry.payload.clone(), entry.metadata.clone()))
    }

    /// Whether a live entry exists. Does not touch statistics or access data.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        let state = self.lock_state("contains");
        state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now, state.max_age))
    }

    pub fn put_value(&self, store: StoreRef, key: &str, value: StoredValue) -> Option<CacheKey> {
        self.put(
            CacheKey::value(store, key),
            CachePayload::Value(value.value),
            value.metadata,
        )
    }

    pub fn get_value(&self, store: &StoreRef, key: &str) -> Option<StoredValue> {
        match self.get(&CacheKey::value(store.clone(), key))? {
            (CachePayload::Value(value), metadata) => Some(StoredValue { value, metadata }),
            (CachePayload::KeyList(_), _) => None,
        }
    }

    pub fn put_key_list(
        &self,
        store: StoreRef,
        prefix: &str,
        page_size: u32,
        keys: Vec<KeyDescriptor>,
    ) -> Option<CacheKey> {
        self.put(
            CacheKey::key_list(store, prefix, page_size),
            CachePayload::KeyList(keys),
            Metadata::new(),
        )
    }

    pub fn get_key_list(
        &self,
        store: &StoreRef,
        prefix: &str,
        page_size: u32,
    ) -> Option<Vec<KeyDescriptor>> {
        match self.get(&CacheKey::key_list(store.clone(), prefix, page_size))? {
            (CachePayload::KeyList(keys), _) => Some(keys),
            (CachePayload::Value(_), _) => None,
        }
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        self.lock_state("invalidate_key").entries.remove(key).is_some()
    }

    /// Remove every value and key-list entry of `store_name`, in any scope.
    pub fn invalidate_store(&self, store_name: &str) -> usize {
        let removed = self
            .lock_state("invalidate_store")
            .remove_where(|key, _| key.belongs_to(store_name));
        debug!(store = store_name, removed, "Invalidated store cache");
        removed
    }

    /// Remove the cached key listings of one store.
    pub fn invalidate_key_lists(&self, store: &StoreRef) -> usize {
        self.lock_state("invalidate_key_lists")
            .remove_where(|key, _| key.kind == EntryKind::KeyList && &key.store == store)
    }

    /// Remove all value and key-list entries. Removed entries count as evictions.
    pub fn clear(&self) -> usize {
        let mut state = self.lock_state("clear");
        let removed = state.entries.len();
        state.entries.clear();
        state.evictions += removed as u64;
        removed
    }

    /// Remove every entry older than the current max age.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock_state("cleanup");
        let max_age = state.max_age;
        let removed = state.remove_where(|_, entry| entry.is_expired(now, max_age));
        if removed > 0 {
            debug!(removed, remaining = state.entries.len(), "Cache cleanup removed expired entries");
        }
        removed
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Cached handle for `store`; counts as one request against it.
    pub fn get_handle(&self, store: &StoreRef) -> Option<StoreHandle> {
        let now = Instant::now();
        let mut handles = self.lock_handles("get_handle");
        let entry = handles.get_mut(store)?;
        entry.last_accessed_at = now;
        entry.request_count += 1;
        Some(entry.handle.clone())
    }

    pub fn put_handle(&self, handle: StoreHandle) {
        let now = Instant::now();
        self.lock_handles("put_handle")
            .insert(handle.store.clone(), HandleEntry::new(handle, now));
    }

    /// Snapshot of a handle's bookkeeping without counting a request.
    pub fn handle_entry(&self, store: &StoreRef) -> Option<HandleEntry> {
        self.lock_handles("handle_entry").get(store).cloned()
    }

    pub fn clear_handles(&self) -> usize {
        let mut handles = self.lock_handles("clear_handles");
        let removed = handles.len();
        handles.clear();
        removed
    }

    pub fn handle_count(&self) -> usize {
        self.lock_handles("handle_count").len()
    }

    // ========================================================================
    // Policy & statistics
    // ========================================================================

    pub fn len(&self) -> usize {
        self.lock_state("len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.lock_state("policy").policy
    }

    pub fn set_policy(&self, policy: EvictionPolicy) {
        self.lock_state("set_policy").policy = policy;
    }

    pub fn max_age(&self) -> Duration {
        self.lock_state("max_age").max_age
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.lock_state("set_max_age").max_age = max_age;
    }

    pub fn stats(&self) -> CacheStatistics {
        let handle_count = self.handle_count();
        let state = self.lock_state("stats");
        CacheStatistics {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            total_size: state.entries.len(),
            handle_count,
            policy: state.policy,
            max_age: state.max_age,
        }
    }

    /// Apply one adaptive tuning pass.
    #[cfg(feature = "adaptive")]
    pub fn adapt(&self) -> crate::adaptive::Tuning {
        use crate::adaptive::{tune, Tuning};

        let mut state = self.lock_state("adapt");
        let current = Tuning {
            policy: state.policy,
            max_age: state.max_age,
        };
        let tuned = tune(state.hits, state.misses, current, &self.config);
        if tuned != current {
            tracing::info!(
                policy = tuned.policy.as_str(),
                max_age_secs = tuned.max_age.as_secs(),
                hit_rate = crate::stats::hit_rate(state.hits, state.misses),
                "Adaptive cache tuning applied"
            );
            state.policy = tuned.policy;
            state.max_age = tuned.max_age;
        }
        tuned
    }

    /// One maintenance tick: expiry sweep, then adaptive tuning when enabled.
    pub fn run_maintenance(&self) -> usize {
        let removed = self.cleanup();
        #[cfg(feature = "adaptive")]
        self.adapt();
        removed
    }

    /// Spawn the periodic cleanup task.
    ///
    /// The task holds a weak reference and exits on the first tick after the
    /// engine is dropped. Must be called from within a tokio runtime.
    pub fn start_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.run_maintenance();
            }

            debug!("Cache cleanup task stopped");
        })
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("max_entries", &self.config.max_entries)
            .field("current_size", &self.len())
            .field("handles", &self.handle_count())
            .finish()
    }
}

fn recover<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(op, "Recovered from poisoned cache lock");
            poisoned.into_inner()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StoreRef {
        StoreRef::new("PlayerData", "global")
    }

    fn engine(max_entries: usize, max_age_secs: u64) -> CacheEngine {
        CacheEngine::new(
            CacheConfig::new()
                .with_max_entries(max_entries)
                .with_max_age(Duration::from_secs(max_age_secs)),
        )
    }

    fn value(v: serde_json::Value) -> StoredValue {
        StoredValue::new(v)
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_get_hit_updates_access() {
        let cache = engine(10, 300);
        cache.put_value(store(), "a", value(json!({"coins": 5})));

        let hit = cache.get_value(&store(), "a").unwrap();
        assert_eq!(hit.value, json!({"coins": 5}));

        cache.get_value(&store(), "a");
        let guard = cache.lock_state("test");
        let entry = guard.entries.get(&CacheKey::value(store(), "a")).unwrap();
        assert_eq!(entry.access_count, 3);
        drop(guard);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_counts_miss() {
        let cache = engine(10, 300);
        assert!(cache.get_value(&store(), "nope").is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let cache = engine(10, 30);
        cache.put_value(store(), "a", value(json!(1)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get_value(&store(), "a").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get_value(&store(), "a").is_none());
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_evicts_least_recently_accessed() {
        let cache = engine(2, 300);
        cache.put_value(store(), "A", value(json!("a")));
        cache.put_value(store(), "B", value(json!("b")));
        cache.get_value(&store(), "A");

        let evicted = cache.put_value(store(), "C", value(json!("c")));
        assert_eq!(evicted, Some(CacheKey::value(store(), "B")));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.contains(&CacheKey::value(store(), "A")));
        assert!(cache.contains(&CacheKey::value(store(), "C")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_untouched_entries_evict_one_of_the_first_two() {
        let cache = engine(2, 300);
        cache.put_value(store(), "A", value(json!("a")));
        cache.put_value(store(), "B", value(json!("b")));
        let evicted = cache.put_value(store(), "C", value(json!("c"))).unwrap();

        assert!(evicted.key == "A" || evicted.key == "B");
        assert_eq!(cache.stats().total_size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lfu_evicts_least_frequent() {
        let cache = CacheEngine::new(
            CacheConfig::new()
                .with_max_entries(2)
                .with_policy(EvictionPolicy::Lfu),
        );
        cache.put_value(store(), "A", value(json!("a")));
        cache.put_value(store(), "B", value(json!("b")));
        cache.get_value(&store(), "A");
        cache.get_value(&store(), "A");
        cache.get_value(&store(), "B");

        let evicted = cache.put_value(store(), "C", value(json!("c")));
        assert_eq!(evicted, Some(CacheKey::value(store(), "B")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_switch_takes_effect() {
        let cache = engine(2, 300);
        cache.set_policy(EvictionPolicy::Lfu);
        assert_eq!(cache.policy(), EvictionPolicy::Lfu);

        cache.put_value(store(), "A", value(json!("a")));
        cache.put_value(store(), "B", value(json!("b")));
        cache.get_value(&store(), "B");
        cache.get_value(&store(), "A");
        cache.get_value(&store(), "A");
        let evicted = cache.put_value(store(), "C", value(json!("c")));
        assert_eq!(evicted, Some(CacheKey::value(store(), "B")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict_or_grow() {
        let cache = engine(2, 300);
        cache.put_value(store(), "A", value(json!(1)));
        cache.put_value(store(), "B", value(json!(2)));
        assert!(cache.put_value(store(), "A", value(json!(3))).is_none());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_value(&store(), "A").unwrap().value, json!(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_lists_share_capacity_with_values() {
        let cache = engine(2, 300);
        cache.put_value(store(), "A", value(json!(1)));
        cache.put_key_list(store(), "", 50, vec![KeyDescriptor::named("A")]);
        cache.put_value(store(), "B", value(json!(2)));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_list_roundtrip() {
        let cache = engine(10, 300);
        let keys = vec![KeyDescriptor::named("p1"), KeyDescriptor::named("p2")];
        cache.put_key_list(store(), "p", 10, keys.clone());

        assert_eq!(cache.get_key_list(&store(), "p", 10), Some(keys));
        assert!(cache.get_key_list(&store(), "p", 20).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_store_removes_all_scopes_only_for_that_store() {
        let cache = engine(10, 300);
        cache.put_value(store(), "a", value(json!(1)));
        cache.put_value(StoreRef::new("PlayerData", "beta"), "a", value(json!(1)));
        cache.put_key_list(store(), "", 10, vec![]);
        cache.put_value(StoreRef::new("PlayerData2", "global"), "a", value(json!(1)));

        assert_eq!(cache.invalidate_store("PlayerData"), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_store("PlayerData"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_key_lists_keeps_values() {
        let cache = engine(10, 300);
        cache.put_value(store(), "a", value(json!(1)));
        cache.put_key_list(store(), "", 10, vec![]);
        cache.put_key_list(store(), "a", 10, vec![]);

        assert_eq!(cache.invalidate_key_lists(&store()), 2);
        assert!(cache.contains(&CacheKey::value(store(), "a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_is_idempotent() {
        let cache = engine(10, 300);
        cache.put_value(store(), "a", value(json!(1)));
        cache.put_value(store(), "b", value(json!(2)));

        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.clear(), 0);
        let stats = cache.stats();
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.evictions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_expired() {
        let cache = engine(10, 60);
        cache.put_value(store(), "old", value(json!(1)));
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put_value(store(), "new", value(json!(2)));
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(cache.cleanup(), 1);
        assert!(cache.contains(&CacheKey::value(store(), "new")));
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handles_survive_clear_and_count_requests() {
        let cache = engine(10, 1);
        let handle = StoreHandle::new(store(), "token-1");
        cache.put_handle(handle.clone());
        cache.clear();
        tokio::time::advance(Duration::from_secs(3600)).await;
        cache.cleanup();

        assert_eq!(cache.get_handle(&store()), Some(handle.clone()));
        assert_eq!(cache.get_handle(&store()), Some(handle));
        assert_eq!(cache.handle_entry(&store()).unwrap().request_count, 2);
        assert_eq!(cache.stats().handle_count, 1);

        assert_eq!(cache.clear_handles(), 1);
        assert!(cache.get_handle(&store()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_runs_periodically() {
        let cache = Arc::new(CacheEngine::new(
            CacheConfig::new()
                .with_max_age(Duration::from_secs(30))
                .with_cleanup_interval(Duration::from_secs(60)),
        ));
        let _task = cache.start_cleanup();
        cache.put_value(store(), "a", value(json!(1)));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cleanup_interval_is_clamped() {
        let cache = Arc::new(CacheEngine::new(
            CacheConfig::new()
                .with_max_age(Duration::from_secs(1))
                .with_cleanup_interval(Duration::ZERO),
        ));
        assert_eq!(cache.config().cleanup_interval, MIN_CLEANUP_INTERVAL);

        let _task = cache.start_cleanup();
        cache.put_value(store(), "a", value(json!(1)));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_when_engine_dropped() {
        let cache = Arc::new(engine(10, 30));
        let task = cache.start_cleanup();
        drop(cache);

        task.await.unwrap();
    }

    #[cfg(feature = "adaptive")]
    #[tokio::test(start_paused = true)]
    async fn test_maintenance_applies_adaptive_tuning() {
        let cache = engine(10, 300);
        cache.get_value(&store(), "missing");
        cache.run_maintenance();

        assert_eq!(cache.policy(), EvictionPolicy::Lfu);
        assert_eq!(cache.max_age(), Duration::from_secs(600));
    }
}
