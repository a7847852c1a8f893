//! Flat key-value store layout
//!
//! Every state shares one keyspace of a [`KvClient`]:
//!
//! ```text
//! {STATE}.{key}         content
//! _mod.{STATE}.{key}    modification time, decimal epoch seconds
//! ```
//!
//! State names never contain the separator and never start with `_`, so
//! a state's content prefix cannot match another state or the timestamp
//! family.

use shep_core::{
    canonical_name, check_item_key, next_timestamp, ShepError, ShepResult, Store, StoreFactory,
    Timestamp, MODIFIED_PREFIX, PARTITION_SEPARATOR,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CloseFlag, StoreCache};

/// External key-value collaborator
///
/// Implementations decide their own connection handling, timeouts and
/// retries; errors are surfaced as they are.
pub trait KvClient: Send + Sync {
    fn get(&self, key: &str) -> ShepResult<Option<Vec<u8>>>;
    
    fn set(&self, key: &str, value: &[u8]) -> ShepResult<()>;
    
    /// Delete a key. Returns false if it was absent.
    fn delete(&self, key: &str) -> ShepResult<bool>;
    
    /// Every entry whose key starts with `prefix`
    fn scan_prefix(&self, prefix: &str) -> ShepResult<Vec<(String, Vec<u8>)>>;
    
    /// Flush and release the connection
    fn close(&self) -> ShepResult<()> {
        Ok(())
    }
}

/// Key holding the content of `key` in `state`
pub fn content_key(state: &str, key: &str) -> String {
    format!("{}{}{}", state, PARTITION_SEPARATOR, key)
}

/// Key holding the modification time of `key` in `state`
pub fn modified_key(state: &str, key: &str) -> String {
    format!(
        "{}{}{}",
        MODIFIED_PREFIX,
        PARTITION_SEPARATOR,
        content_key(state, key)
    )
}

/// State name half of a content key, `None` for timestamp keys
pub fn parse_state_name(key: &str) -> Option<&str> {
    if key.starts_with(MODIFIED_PREFIX) {
        return None;
    }
    key.split_once(PARTITION_SEPARATOR).map(|(state, _)| state)
}

/// Key-value store for a single state
pub struct KvStore<C: KvClient> {
    name: String,
    prefix: String,
    client: Arc<C>,
    binary: bool,
    flag: CloseFlag,
}

impl<C: KvClient> KvStore<C> {
    /// Text mode only holds UTF-8 content, on the way in and out
    fn check_text(&self, key: &str, value: &[u8]) -> ShepResult<()> {
        if !self.binary {
            if let Err(e) = std::str::from_utf8(value) {
                return Err(ShepError::Decode(format!(
                    "{} in store {}: {}",
                    key, self.name, e
                )));
            }
        }
        Ok(())
    }
}

impl<C: KvClient> Store for KvStore<C> {
    fn name(&self) -> &str {
        &self.name
    }
    
    fn put(&self, key: &str, content: &[u8]) -> ShepResult<()> {
        self.flag.check()?;
        check_item_key(key)?;
        self.check_text(key, content)?;
        self.client.set(&content_key(&self.name, key), content)
    }
    
    fn get(&self, key: &str) -> ShepResult<Option<Vec<u8>>> {
        self.flag.check()?;
        match self.client.get(&content_key(&self.name, key))? {
            Some(value) => {
                self.check_text(key, &value)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
    
    fn remove(&self, key: &str) -> ShepResult<bool> {
        self.flag.check()?;
        self.client.delete(&modified_key(&self.name, key))?;
        self.client.delete(&content_key(&self.name, key))
    }
    
    /// Check-then-set: two round-trips, not atomic against other writers
    fn replace(&self, key: &str, content: &[u8]) -> ShepResult<()> {
        self.flag.check()?;
        self.check_text(key, content)?;
        let full_key = content_key(&self.name, key);
        if self.client.get(&full_key)?.is_none() {
            return Err(ShepError::KeyNotFound {
                state: self.name.clone(),
                key: key.to_string(),
            });
        }
        self.client.set(&full_key, content)
    }
    
    fn list(&self) -> ShepResult<Vec<(String, Vec<u8>)>> {
        self.flag.check()?;
        let mut entries = Vec::new();
        for (full_key, value) in self.client.scan_prefix(&self.prefix)? {
            let key = full_key[self.prefix.len()..].to_string();
            self.check_text(&key, &value)?;
            entries.push((key, value));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
    
    fn modified(&self, key: &str) -> ShepResult<Option<Timestamp>> {
        self.flag.check()?;
        match self.client.get(&modified_key(&self.name, key))? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)?;
                text.trim()
                    .parse::<Timestamp>()
                    .map(Some)
                    .map_err(|e| ShepError::Decode(format!("timestamp for {}: {}", key, e)))
            }
            None => Ok(None),
        }
    }
    
    fn register_modify_after(
        &self,
        key: &str,
        previous: Option<Timestamp>,
    ) -> ShepResult<Timestamp> {
        check_item_key(key)?;
        let ts = next_timestamp(self.modified(key)?.max(previous));
        self.client
            .set(&modified_key(&self.name, key), ts.to_string().as_bytes())?;
        Ok(ts)
    }
}

/// Factory sharing one [`KvClient`] between every state
///
/// A partition exists while at least one content key carries its prefix.
pub struct KvStoreFactory<C: KvClient> {
    client: Arc<C>,
    binary: bool,
    cache: StoreCache,
}

impl<C: KvClient + 'static> KvStoreFactory<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            binary: false,
            cache: StoreCache::new(),
        }
    }
    
    /// Pass content through without UTF-8 validation
    pub fn binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }
    
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

impl<C: KvClient + 'static> StoreFactory for KvStoreFactory<C> {
    fn add(&self, name: &str) -> ShepResult<Arc<dyn Store>> {
        let flag = self.cache.flag();
        self.cache.get_or_create(name, |name| {
            debug!("Created key-value store {}", name);
            let store: Arc<dyn Store> = Arc::new(KvStore {
                name: name.to_string(),
                prefix: content_key(name, ""),
                client: self.client.clone(),
                binary: self.binary,
                flag,
            });
            Ok(store)
        })
    }
    
    /// Partitions are prefixes, so a store handle costs nothing in the
    /// backend
    fn lookup(&self, name: &str) -> ShepResult<Option<Arc<dyn Store>>> {
        self.add(name).map(Some)
    }
    
    fn ls(&self) -> ShepResult<Vec<String>> {
        self.cache.flag().check()?;
        let names: BTreeSet<String> = self
            .client
            .scan_prefix("")?
            .into_iter()
            .filter_map(|(key, _)| parse_state_name(&key).map(str::to_string))
            .filter(|state| canonical_name(state).map(|n| &n == state).unwrap_or(false))
            .collect();
        Ok(names.into_iter().collect())
    }
    
    fn close(&self) -> ShepResult<()> {
        if self.cache.is_closed() {
            return Ok(());
        }
        self.cache.close();
        self.client.close()?;
        info!("Closed key-value store factory");
        Ok(())
    }
    
    fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_key_layout() {
        assert_eq!(content_key("FOO", "item1"), "FOO.item1");
        assert_eq!(modified_key("FOO", "item1"), "_mod.FOO.item1");
        assert_eq!(parse_state_name("FOO.item.with.dots"), Some("FOO"));
        assert_eq!(parse_state_name("_mod.FOO.item1"), None);
        assert_eq!(parse_state_name("nodots"), None);
    }
}
