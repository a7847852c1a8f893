//! Configuration types for SHEP

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::registry::DEFAULT_STATE_NAME;

/// Top-level configuration for a persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShepConfig {
    /// Bit width of the state registry
    pub bits: u32,
    
    /// Name of the zero-mask state
    pub default_state: String,
    
    /// Storage backend
    pub backend: BackendConfig,
}

impl Default for ShepConfig {
    fn default() -> Self {
        Self {
            bits: 8,
            default_state: DEFAULT_STATE_NAME.to_string(),
            backend: BackendConfig::default(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-process map, lost on drop
    #[default]
    Memory,
    
    /// One directory per state under `root`
    Filesystem { root: PathBuf },
    
    /// Embedded key-value database
    Sled {
        path: PathBuf,
        
        /// Pass content through without UTF-8 validation
        #[serde(default)]
        binary: bool,
        
        /// Remove the database when the factory is dropped
        #[serde(default)]
        temporary: bool,
    },
}
