//! quotaguard Cache - In-Memory Cache Engine
//!
//! Holds three kinds of data for the data-access layer:
//! - item values, keyed by store, scope and item key
//! - pages of key listings, keyed by store, scope, prefix and page size
//! - opened store handles, one per store and scope
//!
//! Values and key listings share one capacity bound and one max age.
//! Handles never expire and are removed only explicitly.
//!
//! With the `adaptive` feature the periodic cleanup task also retunes the
//! eviction policy and max age from the observed hit rate.

pub mod engine;
pub mod entry;
mod policy;
pub mod stats;

#[cfg(feature = "adaptive")]
pub mod adaptive;

pub use engine::CacheEngine;
pub use entry::{CacheEntry, CacheKey, CachePayload, EntryKind, HandleEntry};
pub use stats::CacheStatistics;

#[cfg(feature = "adaptive")]
pub use adaptive::{tune, Tuning};
