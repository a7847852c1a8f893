//! Backend selection from configuration

use shep_core::{BackendConfig, ShepResult, StoreFactory};
use tracing::info;

use crate::fs::FsStoreFactory;
use crate::kv::KvStoreFactory;
use crate::memory::MemoryStoreFactory;
use crate::persistent::SledClient;

/// Build the store factory described by `config`
pub fn open_factory(config: &BackendConfig) -> ShepResult<Box<dyn StoreFactory>> {
    info!("Opening {:?} backend", config);
    match config {
        BackendConfig::Memory => Ok(Box::new(MemoryStoreFactory::new())),
        BackendConfig::Filesystem { root } => Ok(Box::new(FsStoreFactory::open(root)?)),
        BackendConfig::Sled {
            path,
            binary,
            temporary,
        } => {
            let client = if *temporary {
                SledClient::temporary_at(path)?
            } else {
                SledClient::open(path)?
            };
            Ok(Box::new(KvStoreFactory::new(client).binary(*binary)))
        }
    }
}
