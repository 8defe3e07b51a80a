//! Operation log.
//!
//! A fixed-capacity ring of recent operation records plus lifetime
//! aggregates. Aggregates survive records falling off the ring.

use chrono::Utc;
use quotaguard_core::{ErrorKind, OperationKind, StoreRef, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

/// Failed records included in [`OperationStats::recent_failures`].
pub const RECENT_FAILURES: usize = 10;

/// Outcome of one orchestrated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub kind: OperationKind,
    pub store: String,
    pub scope: String,
    pub key: String,
    /// Remote attempts made; zero when rejected before any call.
    pub attempts: u32,
    pub success: bool,
    pub latency_ms: f64,
    pub error: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub recorded_at: Timestamp,
}

impl OperationRecord {
    pub fn success(kind: OperationKind, store: &StoreRef, key: &str, attempts: u32, latency: Duration) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            store: store.name.clone(),
            scope: store.scope.clone(),
            key: key.to_string(),
            attempts,
            success: true,
            latency_ms: latency.as_secs_f64() * 1000.0,
            error: None,
            error_message: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failure(
        kind: OperationKind,
        store: &StoreRef,
        key: &str,
        attempts: u32,
        latency: Duration,
        error: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error),
            error_message: Some(message.into()),
            ..Self::success(kind, store, key, attempts, latency)
        }
    }
}

/// Aggregates over every operation recorded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    /// `successes / total`; 0 before the first operation.
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub per_kind: BTreeMap<OperationKind, u64>,
    /// Newest first.
    pub recent_failures: Vec<OperationRecord>,
}

/// Ring buffer of operation records.
#[derive(Debug, Clone)]
pub struct OperationLog {
    records: VecDeque<OperationRecord>,
    capacity: usize,
    total: u64,
    successes: u64,
    failures: u64,
    latency_sum_ms: f64,
    per_kind: BTreeMap<OperationKind, u64>,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
            successes: 0,
            failures: 0,
            latency_sum_ms: 0.0,
            per_kind: BTreeMap::new(),
        }
    }

    /// Append a record, dropping the oldest when full.
    pub fn push(&mut self, record: OperationRecord) {
        self.total += 1;
        if record.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.latency_sum_ms += record.latency_ms;
        *self.per_kind.entry(record.kind).or_insert(0) += 1;

        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Up to `count` records, newest first, optionally of one kind.
    pub fn recent(&self, count: usize, kind: Option<OperationKind>) -> Vec<OperationRecord> {
        self.records
            .iter()
            .rev()
            .filter(|record| kind.map_or(true, |k| record.kind == k))
            .take(count)
            .cloned()
            .collect()
    }

    /// Records at the tail of the ring, newest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter().rev().take(count)
    }

    pub fn stats(&self) -> OperationStats {
        let ratio = |num: f64| if self.total == 0 { 0.0 } else { num / self.total as f64 };
        OperationStats {
            total: self.total,
            successes: self.successes,
            failures: self.failures,
            success_rate: ratio(self.successes as f64),
            average_latency_ms: ratio(self.latency_sum_ms),
            per_kind: self.per_kind.clone(),
            recent_failures: self
                .records
                .iter()
                .rev()
                .filter(|record| !record.success)
                .take(RECENT_FAILURES)
                .cloned()
                .collect(),
        }
    }
}
