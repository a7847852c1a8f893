//! Persistent key-value client using sled database

use shep_core::{ShepError, ShepResult};
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::kv::{KvClient, KvStoreFactory};

fn storage_err(e: sled::Error) -> ShepError {
    ShepError::Storage(e.to_string())
}

/// [`KvClient`] backed by a sled database
pub struct SledClient {
    db: Db,
}

impl SledClient {
    pub fn open<P: AsRef<Path>>(path: P) -> ShepResult<Self> {
        let db = sled::open(path.as_ref()).map_err(storage_err)?;
        info!("Opened sled database at {}", path.as_ref().display());
        Ok(Self { db })
    }
    
    /// Database removed from disk once the last handle is dropped
    pub fn temporary() -> ShepResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Ok(Self { db })
    }
    
    /// Temporary database placed at `path`
    pub fn temporary_at<P: AsRef<Path>>(path: P) -> ShepResult<Self> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Ok(Self { db })
    }
    
    /// Number of keys across every partition
    pub fn size_estimate(&self) -> u64 {
        self.db.len() as u64
    }
}

impl KvClient for SledClient {
    fn get(&self, key: &str) -> ShepResult<Option<Vec<u8>>> {
        self.db
            .get(key.as_bytes())
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(storage_err)
    }
    
    fn set(&self, key: &str, value: &[u8]) -> ShepResult<()> {
        self.db.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }
    
    fn delete(&self, key: &str) -> ShepResult<bool> {
        self.db
            .remove(key.as_bytes())
            .map(|old| old.is_some())
            .map_err(storage_err)
    }
    
    fn scan_prefix(&self, prefix: &str) -> ShepResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for result in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = result.map_err(storage_err)?;
            let key = String::from_utf8(key.to_vec())?;
            entries.push((key, value.to_vec()));
        }
        Ok(entries)
    }
    
    fn close(&self) -> ShepResult<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

/// Key-value factory over sled
pub type SledStoreFactory = KvStoreFactory<SledClient>;

/// Thread-safe sled factory wrapper
pub type SharedSledStoreFactory = Arc<SledStoreFactory>;

/// Open a sled-backed factory at `path`
pub fn create_sled_factory<P: AsRef<Path>>(path: P) -> ShepResult<SledStoreFactory> {
    Ok(KvStoreFactory::new(SledClient::open(path)?))
}
