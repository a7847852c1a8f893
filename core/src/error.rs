//! Error types for SHEP

use thiserror::Error;

/// Main error type for SHEP
#[derive(Error, Debug)]
pub enum ShepError {
    // ============ State Vocabulary Errors ============
    #[error("State already exists: {0}")]
    StateExists(String),
    
    #[error("Invalid state: {0}")]
    StateInvalid(String),
    
    #[error("Invalid state name: {0}")]
    InvalidName(String),
    
    #[error("All {bits} state bits are allocated")]
    BitsExhausted { bits: u32 },
    
    // ============ Item Errors ============
    #[error("Item already exists: {0}")]
    StateItemExists(String),
    
    #[error("Item not found: {0}")]
    StateItemNotFound(String),
    
    #[error("Transition rejected: {0}")]
    StateTransitionInvalid(String),
    
    #[error("State corruption detected: {0}")]
    StateCorruption(String),
    
    // ============ Backend Errors ============
    #[error("Key {key} not found in store {state}")]
    KeyNotFound { state: String, key: String },
    
    #[error("Invalid item key: {0}")]
    InvalidKey(String),
    
    #[error("Storage error: {0}")]
    Storage(String),
    
    #[error("Decode error: {0}")]
    Decode(String),
    
    #[error("Store factory is closed")]
    Closed,
    
    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ShepError {
    fn from(err: std::io::Error) -> Self {
        ShepError::Storage(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ShepError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ShepError::Decode(err.to_string())
    }
}

/// Result type for SHEP operations
pub type ShepResult<T> = Result<T, ShepError>;
