//! Core traits defining SHEP storage interfaces
//!
//! Any backend (memory, filesystem, key-value service) plugs in by
//! implementing [`Store`] for a single state partition and
//! [`StoreFactory`] for the shared connection.

use std::sync::Arc;

use crate::error::ShepResult;
use crate::registry::canonical_name;
use crate::types::Timestamp;

/// Separator between a state name and an item key in flat key layouts
pub const PARTITION_SEPARATOR: char = '.';

/// Prefix of the key family holding modification timestamps
pub const MODIFIED_PREFIX: &str = "_mod";

/// Persistence scoped to one state partition
pub trait Store: Send + Sync {
    /// State name this store is bound to
    fn name(&self) -> &str;
    
    /// Write `content` under `key`, overwriting any previous value
    fn put(&self, key: &str, content: &[u8]) -> ShepResult<()>;
    
    /// Content under `key`, `None` if never written or removed
    fn get(&self, key: &str) -> ShepResult<Option<Vec<u8>>>;
    
    /// Check if a key exists
    fn contains(&self, key: &str) -> ShepResult<bool> {
        Ok(self.get(key)?.is_some())
    }
    
    /// Delete content and timestamp. Returns false if the key was absent.
    fn remove(&self, key: &str) -> ShepResult<bool>;
    
    /// Overwrite an existing key, failing with `KeyNotFound` if absent
    fn replace(&self, key: &str, content: &[u8]) -> ShepResult<()>;
    
    /// All entries of this partition, sorted by key
    fn list(&self) -> ShepResult<Vec<(String, Vec<u8>)>>;
    
    /// Keys of this partition, sorted
    fn keys(&self) -> ShepResult<Vec<String>> {
        Ok(self.list()?.into_iter().map(|(key, _)| key).collect())
    }
    
    /// Last recorded modification time for `key`
    fn modified(&self, key: &str) -> ShepResult<Option<Timestamp>>;
    
    /// Record a modification of `key` and return the stored time.
    /// Successive calls for one key return strictly increasing values.
    fn register_modify(&self, key: &str) -> ShepResult<Timestamp> {
        self.register_modify_after(key, None)
    }
    
    /// Record a modification of `key` later than both its stored time and
    /// `previous`, a time carried over from another partition
    fn register_modify_after(
        &self,
        key: &str,
        previous: Option<Timestamp>,
    ) -> ShepResult<Timestamp>;
}

/// Shared backend connection handing out one [`Store`] per state
pub trait StoreFactory: Send + Sync {
    /// Store for `name`, created on first use and cached afterwards
    fn add(&self, name: &str) -> ShepResult<Arc<dyn Store>>;
    
    /// Store for `name` if its partition is already materialised.
    /// Never creates anything in the backend.
    fn lookup(&self, name: &str) -> ShepResult<Option<Arc<dyn Store>>> {
        let name = canonical_name(name)?;
        if self.ls()?.contains(&name) {
            return self.add(&name).map(Some);
        }
        Ok(None)
    }
    
    /// Names of every partition materialised in the backend, sorted
    fn ls(&self) -> ShepResult<Vec<String>>;
    
    /// Release the backend handle. Later calls fail with `Closed`.
    fn close(&self) -> ShepResult<()>;
    
    fn is_closed(&self) -> bool;
}

/// Next timestamp for a key whose previous one was `previous`
pub fn next_timestamp(previous: Option<Timestamp>) -> Timestamp {
    let now = crate::types::now_timestamp();
    match previous {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

/// Reject item keys no backend can hold
pub fn check_item_key(key: &str) -> ShepResult<()> {
    if key.is_empty() {
        return Err(crate::error::ShepError::InvalidKey("empty key".to_string()));
    }
    Ok(())
}
