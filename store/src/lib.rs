//! SHEP Storage Backends
//!
//! Implementations of the `Store`/`StoreFactory` contract:
//! an in-process map, a directory-per-state filesystem layout, and a
//! flat key-value layout over any [`KvClient`] (sled provided).

pub mod cache;
pub mod memory;
pub mod fs;
pub mod kv;
pub mod persistent;
pub mod backend;

pub use memory::*;
pub use fs::*;
pub use kv::*;
pub use persistent::*;
pub use backend::*;
