//! quotaguard Access - Data-Access Orchestrator
//!
//! The façade application code calls. [`DataAccess`] wraps a
//! [`RemoteStore`](quotaguard_core::RemoteStore) with input validation, the
//! cache engine, the budget & throttle controller and an operation log.
//!
//! ```ignore
//! use quotaguard_access::DataAccess;
//! use quotaguard_core::{AccessOptions, GuardConfig};
//!
//! let access = DataAccess::new(client, GuardConfig::from_env())?;
//! let _tasks = access.start_background_tasks();
//!
//! access.write("PlayerData", "player_1", &json!({"coins": 5}), &AccessOptions::new()).await?;
//! let value = access.read("PlayerData", "player_1", &AccessOptions::new()).await?;
//! ```

pub mod history;
pub mod orchestrator;
pub mod validation;

pub use history::{OperationLog, OperationRecord, OperationStats};
pub use orchestrator::{DataAccess, StatsSnapshot, WriteOutcome};

pub use quotaguard_cache::{CacheEngine, CacheStatistics};
pub use quotaguard_core::{
    AccessOptions, ErrorKind, GuardConfig, GuardError, GuardResult, HealthCheck, HealthStatus,
    KeyDescriptor, OperationKind, RemoteStore, StoredValue,
};
pub use quotaguard_throttle::{BudgetController, BudgetStats};
