//! State vocabulary: bit allocation for base states and alias composition

use std::collections::HashMap;
use tracing::debug;

use crate::error::{ShepError, ShepResult};
use crate::types::{StateDefinition, StateMask};

/// Name of the zero-mask state unless configured otherwise
pub const DEFAULT_STATE_NAME: &str = "NEW";

/// Maximum bit width a registry can be created with
pub const MAX_BITS: u32 = u64::BITS;

/// Canonicalise a state name, rejecting anything that would collide with
/// the storage key layout.
pub fn canonical_name(name: &str) -> ShepResult<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(ShepError::InvalidName(name.to_string()));
    }
    Ok(name.to_ascii_uppercase())
}

/// Registry of named states
///
/// Base states are handed single bits in allocation order. Aliases name
/// unions of two or more base states and can be queried but never hold
/// items. Every registry also owns a default state with the empty mask.
#[derive(Debug, Clone)]
pub struct StateRegistry {
    bits: u32,
    cursor: u32,
    default: StateDefinition,
    definitions: Vec<StateDefinition>,
    by_name: HashMap<String, usize>,
    by_mask: HashMap<StateMask, usize>,
}

impl StateRegistry {
    pub fn new(bits: u32) -> ShepResult<Self> {
        if bits == 0 || bits > MAX_BITS {
            return Err(ShepError::Config(format!(
                "bit width must be between 1 and {}, got {}",
                MAX_BITS, bits
            )));
        }
        Ok(Self {
            bits,
            cursor: 0,
            default: StateDefinition::base(DEFAULT_STATE_NAME, StateMask::EMPTY),
            definitions: Vec::new(),
            by_name: HashMap::new(),
            by_mask: HashMap::new(),
        })
    }
    
    /// Rename the default state. Fails if the name is already in use.
    pub fn with_default_state(mut self, name: &str) -> ShepResult<Self> {
        let name = canonical_name(name)?;
        if self.by_name.contains_key(&name) {
            return Err(ShepError::StateExists(name));
        }
        self.default.name = name;
        Ok(self)
    }
    
    fn check_name(&self, name: &str) -> ShepResult<String> {
        let name = canonical_name(name)?;
        if name == self.default.name || self.by_name.contains_key(&name) {
            return Err(ShepError::StateExists(name));
        }
        Ok(name)
    }
    
    fn insert(&mut self, definition: StateDefinition) {
        let idx = self.definitions.len();
        self.by_name.insert(definition.name.clone(), idx);
        self.by_mask.insert(definition.mask, idx);
        self.definitions.push(definition);
    }
    
    /// Allocate the next free bit to `name`
    pub fn add(&mut self, name: &str) -> ShepResult<StateMask> {
        let name = self.check_name(name)?;
        if self.cursor >= self.bits {
            return Err(ShepError::BitsExhausted { bits: self.bits });
        }
        
        let mask = StateMask::bit(self.cursor);
        self.cursor += 1;
        debug!("Added state {} = {}", name, mask);
        self.insert(StateDefinition::base(name, mask));
        
        Ok(mask)
    }
    
    /// Bind `name` to a union of already registered base states
    pub fn alias(&mut self, name: &str, mask: impl Into<StateMask>) -> ShepResult<StateMask> {
        let mask = mask.into();
        let name = self.check_name(name)?;
        
        if mask.is_pure() {
            return Err(ShepError::StateInvalid(format!(
                "alias {} must combine at least two states, got {}",
                name, mask
            )));
        }
        let unbacked = mask & !self.allocated();
        if !unbacked.is_empty() {
            return Err(ShepError::StateInvalid(format!(
                "alias {} uses unregistered bits {}",
                name, unbacked
            )));
        }
        if let Some(&idx) = self.by_mask.get(&mask) {
            return Err(ShepError::StateExists(format!(
                "{} is already named {}",
                mask, self.definitions[idx].name
            )));
        }
        
        debug!("Added alias {} = {}", name, mask);
        self.insert(StateDefinition::alias(name, mask));
        
        Ok(mask)
    }
    
    /// Bind `name` to the union of the named states
    pub fn alias_of(&mut self, name: &str, states: &[&str]) -> ShepResult<StateMask> {
        let mut mask = StateMask::EMPTY;
        for state in states {
            mask |= self.from_name(state)?;
        }
        self.alias(name, mask)
    }
    
    /// Exact reverse lookup of a mask
    pub fn name(&self, mask: impl Into<StateMask>) -> ShepResult<&str> {
        let mask = mask.into();
        if mask.is_empty() {
            return Ok(&self.default.name);
        }
        self.by_mask
            .get(&mask)
            .map(|&idx| self.definitions[idx].name.as_str())
            .ok_or_else(|| ShepError::StateInvalid(mask.to_string()))
    }
    
    /// Mask registered under `name`
    pub fn from_name(&self, name: &str) -> ShepResult<StateMask> {
        self.get(name)
            .ok_or_else(|| ShepError::StateInvalid(name.to_string()))
    }
    
    /// Mask registered under `name`, if any
    pub fn get(&self, name: &str) -> Option<StateMask> {
        self.definition(name).map(|d| d.mask)
    }
    
    pub fn definition(&self, name: &str) -> Option<&StateDefinition> {
        let name = name.to_ascii_uppercase();
        if name == self.default.name {
            return Some(&self.default);
        }
        self.by_name.get(&name).map(|&idx| &self.definitions[idx])
    }
    
    /// The zero-mask default state
    pub fn default_state(&self) -> &StateDefinition {
        &self.default
    }
    
    /// Whether items may be stored under `mask`
    pub fn is_concrete(&self, mask: StateMask) -> bool {
        mask.is_empty() || (mask.is_pure() && self.by_mask.contains_key(&mask))
    }
    
    pub fn is_pure(&self, mask: StateMask) -> bool {
        mask.is_pure()
    }
    
    /// Names of the base states making up `mask`
    pub fn elements(&self, mask: impl Into<StateMask>) -> ShepResult<Vec<String>> {
        let mask = mask.into();
        if mask.is_empty() {
            return Ok(vec![self.default.name.clone()]);
        }
        mask.bits()
            .map(|bit| self.name(bit).map(str::to_string))
            .collect()
    }
    
    /// Exact name for `mask` if registered, plus the names of every
    /// registered base state it overlaps
    pub fn matches(&self, mask: impl Into<StateMask>) -> (Option<String>, Vec<String>) {
        let mask = mask.into();
        let exact = self.name(mask).ok().map(str::to_string);
        let parts = mask
            .bits()
            .filter_map(|bit| self.by_mask.get(&bit))
            .map(|&idx| self.definitions[idx].name.clone())
            .collect();
        (exact, parts)
    }
    
    /// Base states in allocation order
    pub fn base_states(&self) -> impl Iterator<Item = &StateDefinition> {
        self.definitions.iter().filter(|d| !d.composite)
    }
    
    /// Default state followed by base states
    pub fn concrete_states(&self) -> impl Iterator<Item = &StateDefinition> {
        std::iter::once(&self.default).chain(self.base_states())
    }
    
    pub fn aliases(&self) -> impl Iterator<Item = &StateDefinition> {
        self.definitions.iter().filter(|d| d.composite)
    }
    
    /// Every registered definition, default state first
    pub fn all(&self) -> impl Iterator<Item = &StateDefinition> {
        std::iter::once(&self.default).chain(self.definitions.iter())
    }
    
    /// Number of allocated base states
    pub fn count(&self) -> u32 {
        self.cursor
    }
    
    pub fn bits(&self) -> u32 {
        self.bits
    }
    
    /// Mask covering every bit this registry may allocate
    pub fn limit(&self) -> StateMask {
        StateMask(low_bits(self.bits))
    }
    
    /// Mask covering every bit already allocated
    pub fn allocated(&self) -> StateMask {
        StateMask(low_bits(self.cursor))
    }
}

fn low_bits(n: u32) -> u64 {
    if n >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    
    fn scenario() -> StateRegistry {
        let mut registry = StateRegistry::new(4).unwrap();
        registry.add("foo").unwrap();
        registry.add("bar").unwrap();
        registry.add("baz").unwrap();
        registry
    }
    
    #[test]
    fn test_add_allocates_bits() {
        let mut registry = StateRegistry::new(4).unwrap();
        assert_eq!(registry.add("foo").unwrap(), StateMask(1));
        assert_eq!(registry.add("bar").unwrap(), StateMask(2));
        assert_eq!(registry.add("baz").unwrap(), StateMask(4));
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.from_name("FOO").unwrap(), StateMask(1));
        assert_eq!(registry.get("Baz"), Some(StateMask(4)));
    }
    
    #[test]
    fn test_alias() {
        let mut registry = scenario();
        let bar = registry.from_name("bar").unwrap();
        let baz = registry.from_name("baz").unwrap();
        
        assert_eq!(registry.alias("xyzzy", bar | baz).unwrap(), StateMask(6));
        assert_eq!(registry.name(StateMask(6)).unwrap(), "XYZZY");
        assert!(registry.definition("xyzzy").unwrap().composite);
        assert!(!registry.is_concrete(StateMask(6)));
        assert!(registry.is_concrete(bar));
    }
    
    #[test]
    fn test_alias_of_names() {
        let mut registry = scenario();
        let mask = registry.alias_of("plugh", &["foo", "baz"]).unwrap();
        assert_eq!(mask, StateMask(5));
        assert!(matches!(
            registry.alias_of("xyzzy", &["foo", "nope"]),
            Err(ShepError::StateInvalid(_))
        ));
    }
    
    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = scenario();
        registry.alias("xyzzy", 6u64).unwrap();
        
        assert!(matches!(registry.add("foo"), Err(ShepError::StateExists(_))));
        assert!(matches!(registry.add("XYZZY"), Err(ShepError::StateExists(_))));
        assert!(matches!(registry.alias("bar", 3u64), Err(ShepError::StateExists(_))));
        assert!(matches!(registry.add("new"), Err(ShepError::StateExists(_))));
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.aliases().count(), 1);
    }
    
    #[test]
    fn test_alias_rejects_bad_masks() {
        let mut registry = scenario();
        
        assert!(matches!(registry.alias("single", 2u64), Err(ShepError::StateInvalid(_))));
        assert!(matches!(registry.alias("empty", 0u64), Err(ShepError::StateInvalid(_))));
        assert!(matches!(registry.alias("unbacked", 9u64), Err(ShepError::StateInvalid(_))));
        
        registry.alias("xyzzy", 6u64).unwrap();
        assert!(matches!(registry.alias("again", 6u64), Err(ShepError::StateExists(_))));
        assert!(registry.get("again").is_none());
    }
    
    #[test]
    fn test_bits_exhausted() {
        let mut registry = scenario();
        registry.add("qux").unwrap();
        assert!(matches!(
            registry.add("quux"),
            Err(ShepError::BitsExhausted { bits: 4 })
        ));
        assert!(registry.get("quux").is_none());
    }
    
    #[test]
    fn test_invalid_names() {
        let mut registry = scenario();
        for bad in ["", "1abc", "_mod", "a.b", "with space"] {
            assert!(matches!(registry.add(bad), Err(ShepError::InvalidName(_))), "{}", bad);
        }
    }
    
    #[test]
    fn test_name_lookup() {
        let registry = scenario();
        assert_eq!(registry.name(StateMask::EMPTY).unwrap(), DEFAULT_STATE_NAME);
        assert_eq!(registry.name(StateMask(4)).unwrap(), "BAZ");
        assert!(matches!(registry.name(StateMask(3)), Err(ShepError::StateInvalid(_))));
        assert!(matches!(registry.name(StateMask(8)), Err(ShepError::StateInvalid(_))));
    }
    
    #[test]
    fn test_default_state_rename() {
        let registry = StateRegistry::new(2)
            .unwrap()
            .with_default_state("pending")
            .unwrap();
        assert_eq!(registry.default_state().name, "PENDING");
        assert_eq!(registry.from_name("pending").unwrap(), StateMask::EMPTY);
        assert!(registry.is_concrete(StateMask::EMPTY));
    }
    
    #[test]
    fn test_elements_and_matches() {
        let mut registry = scenario();
        registry.alias("xyzzy", 6u64).unwrap();
        
        assert_eq!(registry.elements(6u64).unwrap(), vec!["BAR", "BAZ"]);
        assert_eq!(registry.elements(0u64).unwrap(), vec!["NEW"]);
        assert!(registry.elements(8u64).is_err());
        
        let (exact, parts) = registry.matches(6u64);
        assert_eq!(exact.as_deref(), Some("XYZZY"));
        assert_eq!(parts, vec!["BAR", "BAZ"]);
        
        let (exact, parts) = registry.matches(5u64);
        assert!(exact.is_none());
        assert_eq!(parts, vec!["FOO", "BAZ"]);
    }
    
    #[test]
    fn test_invalid_bit_width() {
        assert!(matches!(StateRegistry::new(0), Err(ShepError::Config(_))));
        assert!(matches!(StateRegistry::new(65), Err(ShepError::Config(_))));
        let registry = StateRegistry::new(64).unwrap();
        assert_eq!(registry.limit(), StateMask(u64::MAX));
    }
    
    proptest! {
        #[test]
        fn prop_base_masks_are_distinct_bits(bits in 1u32..=64, adds in 0usize..80) {
            let mut registry = StateRegistry::new(bits).unwrap();
            for i in 0..adds {
                let result = registry.add(&format!("s{}", i));
                if (i as u32) < bits {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert!(
                        matches!(result, Err(ShepError::BitsExhausted { .. })),
                        "expected bit exhaustion"
                    );
                }
            }
            
            let mut seen = StateMask::EMPTY;
            for def in registry.base_states() {
                prop_assert!(def.mask.is_pure() && !def.mask.is_empty());
                prop_assert!((seen & def.mask).is_empty());
                seen |= def.mask;
            }
            prop_assert_eq!(registry.count() as usize, adds.min(bits as usize));
        }
        
        #[test]
        fn prop_alias_is_union_of_elements(picks in proptest::collection::vec(0u32..8, 2..6)) {
            let mut registry = StateRegistry::new(8).unwrap();
            let names: Vec<String> = (0..8).map(|i| format!("s{}", i)).collect();
            for name in &names {
                registry.add(name).unwrap();
            }
            
            let mask = picks.iter().fold(StateMask::EMPTY, |acc, &i| acc | StateMask::bit(i));
            prop_assume!(!mask.is_pure());
            
            registry.alias("combo", mask).unwrap();
            let union = registry
                .elements(mask)
                .unwrap()
                .iter()
                .fold(StateMask::EMPTY, |acc, n| acc | registry.from_name(n).unwrap());
            prop_assert_eq!(union, mask);
            prop_assert_eq!(registry.from_name("combo").unwrap(), mask);
        }
    }
}
