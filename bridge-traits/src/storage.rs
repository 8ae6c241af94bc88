//! Local key-value store abstraction.
//!
//! The store the sync engine keeps aligned with remote providers. Values are
//! arbitrary JSON documents addressed by string keys.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// Batch of key/value pairs read from or written to a [`LocalStore`].
pub type StoreEntries = HashMap<String, Value>;

/// Local key-value store trait
///
/// Mirrors a browser-extension style storage area: batched reads by key
/// list, batched writes by map. Keys that are absent from the store are
/// simply missing from the returned map.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::LocalStore;
///
/// async fn read_profile(store: &dyn LocalStore) -> Result<Option<Value>> {
///     let mut entries = store.get(&["profile".to_string()]).await?;
///     Ok(entries.remove("profile"))
/// }
/// ```
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read the given keys. Missing keys are omitted from the result.
    async fn get(&self, keys: &[String]) -> Result<StoreEntries>;

    /// Write every entry, overwriting existing values.
    async fn set(&self, entries: StoreEntries) -> Result<()>;
}
