//! In-memory store for testing and short-lived processes

use dashmap::DashMap;
use shep_core::{
    check_item_key, next_timestamp, ShepError, ShepResult, Store, StoreFactory, Timestamp,
};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CloseFlag, StoreCache};

/// Content and timestamps of one state
#[derive(Debug, Default)]
struct Partition {
    entries: DashMap<String, Vec<u8>>,
    modified: DashMap<String, Timestamp>,
}

/// In-memory store for a single state
pub struct MemoryStore {
    name: String,
    partition: Arc<Partition>,
    flag: CloseFlag,
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }
    
    fn put(&self, key: &str, content: &[u8]) -> ShepResult<()> {
        self.flag.check()?;
        check_item_key(key)?;
        self.partition
            .entries
            .insert(key.to_string(), content.to_vec());
        Ok(())
    }
    
    fn get(&self, key: &str) -> ShepResult<Option<Vec<u8>>> {
        self.flag.check()?;
        Ok(self.partition.entries.get(key).map(|v| v.value().clone()))
    }
    
    fn contains(&self, key: &str) -> ShepResult<bool> {
        self.flag.check()?;
        Ok(self.partition.entries.contains_key(key))
    }
    
    fn remove(&self, key: &str) -> ShepResult<bool> {
        self.flag.check()?;
        self.partition.modified.remove(key);
        Ok(self.partition.entries.remove(key).is_some())
    }
    
    fn replace(&self, key: &str, content: &[u8]) -> ShepResult<()> {
        self.flag.check()?;
        match self.partition.entries.get_mut(key) {
            Some(mut entry) => {
                *entry.value_mut() = content.to_vec();
                Ok(())
            }
            None => Err(ShepError::KeyNotFound {
                state: self.name.clone(),
                key: key.to_string(),
            }),
        }
    }
    
    fn list(&self) -> ShepResult<Vec<(String, Vec<u8>)>> {
        self.flag.check()?;
        let mut entries: Vec<(String, Vec<u8>)> = self
            .partition
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
    
    fn modified(&self, key: &str) -> ShepResult<Option<Timestamp>> {
        self.flag.check()?;
        Ok(self.partition.modified.get(key).map(|t| *t))
    }
    
    fn register_modify_after(
        &self,
        key: &str,
        previous: Option<Timestamp>,
    ) -> ShepResult<Timestamp> {
        self.flag.check()?;
        check_item_key(key)?;
        let mut slot = self.partition.modified.entry(key.to_string()).or_insert(0);
        *slot = next_timestamp(Some(*slot).max(previous));
        Ok(*slot)
    }
}

/// Map-of-maps backend
///
/// A partition exists from the first `add` of its state until the
/// factory is closed, whether or not it holds items.
pub struct MemoryStoreFactory {
    partitions: DashMap<String, Arc<Partition>>,
    cache: StoreCache,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        info!("Opened in-memory store factory");
        Self {
            partitions: DashMap::new(),
            cache: StoreCache::new(),
        }
    }
}

impl Default for MemoryStoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn add(&self, name: &str) -> ShepResult<Arc<dyn Store>> {
        let flag = self.cache.flag();
        self.cache.get_or_create(name, |name| {
            let partition = self
                .partitions
                .entry(name.to_string())
                .or_default()
                .clone();
            debug!("Created memory store {}", name);
            let store: Arc<dyn Store> = Arc::new(MemoryStore {
                name: name.to_string(),
                partition,
                flag,
            });
            Ok(store)
        })
    }
    
    fn ls(&self) -> ShepResult<Vec<String>> {
        self.cache.flag().check()?;
        let mut names: Vec<String> = self.partitions.iter().map(|p| p.key().clone()).collect();
        names.sort();
        Ok(names)
    }
    
    fn close(&self) -> ShepResult<()> {
        self.cache.close();
        self.partitions.clear();
        info!("Closed in-memory store factory");
        Ok(())
    }
    
    fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }
}

/// Thread-safe memory factory wrapper
pub type SharedMemoryStoreFactory = Arc<MemoryStoreFactory>;

/// Create a shared memory store factory
pub fn create_memory_factory() -> SharedMemoryStoreFactory {
    Arc::new(MemoryStoreFactory::new())
}
