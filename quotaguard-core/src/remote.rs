//! The remote storage seam.

use crate::{KeyDescriptor, Metadata, RemoteError, StoreHandle, StoreRef, StoredValue};
use async_trait::async_trait;

/// Client for a quota-limited remote key-value service.
///
/// Implementations report failures as raw [`RemoteError`] text; the
/// resilience layer classifies, retries and paces calls around them.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a store for subsequent calls.
    ///
    /// # Arguments
    /// * `store` - Store name and scope
    ///
    /// # Returns
    /// * `Ok(StoreHandle)` - Handle passed to every other call on this store
    async fn open_store(&self, store: &StoreRef) -> Result<StoreHandle, RemoteError>;

    /// Read one key.
    ///
    /// # Returns
    /// * `Ok(Some(StoredValue))` - The value and its metadata
    /// * `Ok(None)` - The key holds no value
    async fn get(&self, handle: &StoreHandle, key: &str)
        -> Result<Option<StoredValue>, RemoteError>;

    /// Write one key. A `None` value deletes it.
    ///
    /// # Arguments
    /// * `user_ids` - Ownership tags stored with the key
    /// * `metadata` - Free-form metadata stored with the key
    async fn set(
        &self,
        handle: &StoreHandle,
        key: &str,
        value: Option<&serde_json::Value>,
        user_ids: &[u64],
        metadata: &Metadata,
    ) -> Result<(), RemoteError>;

    /// List up to `page_size` keys starting with `prefix`, in key order.
    async fn list_keys(
        &self,
        handle: &StoreHandle,
        prefix: &str,
        page_size: u32,
    ) -> Result<Vec<KeyDescriptor>, RemoteError>;
}
