//! SHEP Core Library
//!
//! State vocabulary, storage traits and error types shared by every
//! SHEP backend and by the persisted state façade.

pub mod types;
pub mod registry;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use registry::*;
pub use traits::*;
pub use error::*;
pub use config::*;
