//! Cache keys and entry records.

use quotaguard_core::{KeyDescriptor, Metadata, StoreHandle, StoreRef};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Which logical map an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// A single item value.
    Value,
    /// One page of a key listing.
    KeyList,
}

/// Composite key: store (name + scope) plus the item key or listing query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntryKind,
    pub store: StoreRef,
    pub key: String,
}

impl CacheKey {
    /// Key for an item value.
    pub fn value(store: StoreRef, key: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Value,
            store,
            key: key.into(),
        }
    }

    /// Key for a listing of `store` filtered by `prefix`, one page of `page_size`.
    pub fn key_list(store: StoreRef, prefix: &str, page_size: u32) -> Self {
        Self {
            kind: EntryKind::KeyList,
            store,
            key: format!("{}#{}", prefix, page_size),
        }
    }

    pub fn belongs_to(&self, store_name: &str) -> bool {
        self.store.name == store_name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntryKind::Value => write!(f, "{}:{}", self.store, self.key),
            EntryKind::KeyList => write!(f, "{}:keys[{}]", self.store, self.key),
        }
    }
}

/// Payload held by a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    Value(serde_json::Value),
    KeyList(Vec<KeyDescriptor>),
}

/// One cached value or key listing.
///
/// `access_count` starts at 1 on insert and grows on every hit.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: CachePayload,
    pub metadata: Metadata,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    /// Monotonic access sequence; orders accesses that share an instant.
    pub(crate) access_seq: u64,
}

impl CacheEntry {
    pub(crate) fn new(payload: CachePayload, metadata: Metadata, now: Instant, seq: u64) -> Self {
        Self {
            payload,
            metadata,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            access_seq: seq,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Stale once strictly older than `max_age`.
    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    pub(crate) fn touch(&mut self, now: Instant, seq: u64) {
        self.last_accessed_at = now;
        self.access_count += 1;
        self.access_seq = seq;
    }
}

/// Opened store handle. Never expires by age.
#[derive(Debug, Clone)]
pub struct HandleEntry {
    pub handle: StoreHandle,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub request_count: u64,
}

impl HandleEntry {
    pub(crate) fn new(handle: StoreHandle, now: Instant) -> Self {
        Self {
            handle,
            created_at: now,
            last_accessed_at: now,
            request_count: 0,
        }
    }
}
