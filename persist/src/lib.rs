//! SHEP Persisted State
//!
//! Combines a [`shep_core::StateRegistry`] with a
//! [`shep_core::StoreFactory`] to track which concrete state each item
//! occupies and to move items between states.

pub mod persisted;

pub use persisted::*;
pub use shep_core::{ShepConfig, ShepError, ShepResult, StateMask, StateRegistry};
