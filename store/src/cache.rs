//! Per-factory store cache and close flag

use parking_lot::RwLock;
use shep_core::{canonical_name, ShepError, ShepResult, Store};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared open/closed flag checked by every store of a factory
#[derive(Debug, Clone, Default)]
pub struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
    
    /// Fail with `Closed` once the factory has been closed
    pub fn check(&self) -> ShepResult<()> {
        if self.is_closed() {
            return Err(ShepError::Closed);
        }
        Ok(())
    }
}

/// Stores created by one factory, keyed by canonical state name
#[derive(Default)]
pub struct StoreCache {
    stores: RwLock<HashMap<String, Arc<dyn Store>>>,
    flag: CloseFlag,
}

impl StoreCache {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn flag(&self) -> CloseFlag {
        self.flag.clone()
    }
    
    /// Cached store for `name`, building it with `create` on first use
    pub fn get_or_create<F>(&self, name: &str, create: F) -> ShepResult<Arc<dyn Store>>
    where
        F: FnOnce(&str) -> ShepResult<Arc<dyn Store>>,
    {
        self.flag.check()?;
        let name = canonical_name(name)?;
        
        if let Some(store) = self.stores.read().get(&name) {
            return Ok(store.clone());
        }
        
        let mut stores = self.stores.write();
        if let Some(store) = stores.get(&name) {
            return Ok(store.clone());
        }
        let store = create(&name)?;
        stores.insert(name, store.clone());
        Ok(store)
    }
    
    /// Mark closed and drop every cached store
    pub fn close(&self) {
        self.flag.close();
        self.stores.write().clear();
    }
    
    pub fn is_closed(&self) -> bool {
        self.flag.is_closed()
    }
}
