//! Core types for SHEP
//!
//! A state is a bit pattern. Base states own exactly one bit, aliases
//! are unions of base states, and the default state is the empty mask.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bit pattern identifying a state or a union of states
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct StateMask(pub u64);

impl StateMask {
    /// The default state
    pub const EMPTY: StateMask = StateMask(0);
    
    pub fn new(bits: u64) -> Self {
        StateMask(bits)
    }
    
    /// Mask with only bit `index` set
    pub fn bit(index: u32) -> Self {
        StateMask(1u64 << index)
    }
    
    pub fn value(&self) -> u64 {
        self.0
    }
    
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    
    /// True for the empty mask and for single-bit masks
    pub fn is_pure(&self) -> bool {
        self.0 & self.0.wrapping_sub(1) == 0
    }
    
    pub fn contains(&self, other: StateMask) -> bool {
        self.0 & other.0 == other.0
    }
    
    /// Number of bits set
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }
    
    /// Iterate the single-bit masks making up this mask, lowest first
    pub fn bits(&self) -> impl Iterator<Item = StateMask> {
        let value = self.0;
        (0..u64::BITS)
            .map(|i| 1u64 << i)
            .filter(move |b| value & b != 0)
            .map(StateMask)
    }
}

impl BitOr for StateMask {
    type Output = StateMask;
    
    fn bitor(self, rhs: StateMask) -> StateMask {
        StateMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for StateMask {
    fn bitor_assign(&mut self, rhs: StateMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StateMask {
    type Output = StateMask;
    
    fn bitand(self, rhs: StateMask) -> StateMask {
        StateMask(self.0 & rhs.0)
    }
}

impl Not for StateMask {
    type Output = StateMask;
    
    fn not(self) -> StateMask {
        StateMask(!self.0)
    }
}

impl From<u64> for StateMask {
    fn from(value: u64) -> Self {
        StateMask(value)
    }
}

impl fmt::Display for StateMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for StateMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateMask({:#b})", self.0)
    }
}

/// A named state registered in a [`crate::StateRegistry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDefinition {
    /// Canonical upper-case name
    pub name: String,
    pub mask: StateMask,
    /// Defined as a union of other states rather than a fresh bit
    pub composite: bool,
}

impl StateDefinition {
    pub fn base(name: impl Into<String>, mask: StateMask) -> Self {
        Self {
            name: name.into(),
            mask,
            composite: false,
        }
    }
    
    pub fn alias(name: impl Into<String>, mask: StateMask) -> Self {
        Self {
            name: name.into(),
            mask,
            composite: true,
        }
    }
    
    /// Concrete states are storage partitions
    pub fn is_concrete(&self) -> bool {
        !self.composite
    }
}

/// Seconds since the Unix epoch
pub type Timestamp = u64;

/// Current time as epoch seconds
pub fn now_timestamp() -> Timestamp {
    chrono::Utc::now().timestamp().max(0) as Timestamp
}
