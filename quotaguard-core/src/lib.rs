//! quotaguard Core - Shared Types
//!
//! Data types shared by the cache engine, the budget controller and the
//! data-access orchestrator, plus the [`RemoteStore`] seam they are built
//! against. This crate holds no I/O and no background work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod health;
pub mod remote;
pub mod telemetry;

pub use config::{
    BudgetConfig, CacheConfig, EvictionPolicy, GuardConfig, QueueConfig, RetryConfig,
    ValidationConfig,
};
pub use error::{ConfigError, ErrorKind, GuardError, GuardResult, RemoteError, ValidationError};
pub use health::{HealthCheck, HealthStatus};
pub use remote::RemoteStore;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Free-form metadata attached to values, writes and key descriptors.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Scope used when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "global";

/// A remote store qualified by its scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreRef {
    pub name: String,
    pub scope: String,
}

impl StoreRef {
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }

    /// Build a store reference from a name and the caller's options.
    pub fn from_options(name: &str, options: &AccessOptions) -> Self {
        Self::new(name, options.scope_or_default())
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Opened reference to a remote store.
///
/// Remote implementations decide what `token` means; the resilience layer
/// only keeps the handle alive so the store is not reopened on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHandle {
    pub handle_id: Uuid,
    pub store: StoreRef,
    pub token: String,
    pub opened_at: Timestamp,
}

impl StoreHandle {
    pub fn new(store: StoreRef, token: impl Into<String>) -> Self {
        Self {
            handle_id: Uuid::now_v7(),
            store,
            token: token.into(),
            opened_at: Utc::now(),
        }
    }
}

/// Description of one key returned by a key listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub user_ids: Vec<u64>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl KeyDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            metadata: Metadata::new(),
            user_ids: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Value read back from a remote store, with the metadata stored beside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StoredValue {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// CALL OPTIONS
// ============================================================================

/// Per-call options recognised by the orchestrator.
///
/// Deserializing ignores fields it does not know about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessOptions {
    /// Logical partition qualifying the store name.
    pub scope: Option<String>,
    /// Ownership tags attached to writes.
    pub user_ids: Vec<u64>,
    /// Free-form metadata attached to writes.
    pub metadata: Metadata,
}

impl AccessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_user_ids(mut self, user_ids: Vec<u64>) -> Self {
        self.user_ids = user_ids;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn scope_or_default(&self) -> &str {
        self.scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Kind of data-access operation, used for telemetry and history filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Read,
    Write,
    Delete,
    List,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [Self::Read, Self::Write, Self::Delete, Self::List];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
            Self::List => "LIST",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_ref_display() {
        let store = StoreRef::new("PlayerData", "season-1");
        assert_eq!(store.to_string(), "season-1/PlayerData");
    }

    #[test]
    fn test_store_ref_defaults_scope() {
        let store = StoreRef::from_options("PlayerData", &AccessOptions::default());
        assert_eq!(store.scope, DEFAULT_SCOPE);

        let scoped = StoreRef::from_options("PlayerData", &AccessOptions::new().with_scope("beta"));
        assert_eq!(scoped.scope, "beta");
    }

    #[test]
    fn test_access_options_ignore_unknown_fields() {
        let json = serde_json::json!({
            "scope": "beta",
            "userIds": [1, 2],
            "user_ids": [7],
            "colour": "blue"
        });
        let options: AccessOptions = serde_json::from_value(json).unwrap();
        assert_eq!(options.scope.as_deref(), Some("beta"));
        assert_eq!(options.user_ids, vec![7]);
        assert!(options.metadata.is_empty());
    }

    #[test]
    fn test_operation_kind_serializes_upper_case() {
        let json = serde_json::to_string(&OperationKind::Delete).unwrap();
        assert_eq!(json, "\"DELETE\"");
        assert_eq!(OperationKind::List.to_string(), "LIST");
    }

    #[test]
    fn test_key_descriptor_defaults() {
        let descriptor: KeyDescriptor =
            serde_json::from_value(serde_json::json!({ "name": "player_1" })).unwrap();
        assert_eq!(descriptor, KeyDescriptor::named("player_1"));
    }
}
