//! Item lifecycle over a state registry and a store factory

use parking_lot::RwLock;
use shep_core::{
    canonical_name, check_item_key, ShepConfig, ShepError, ShepResult, StateMask, StateRegistry,
    Store, StoreFactory, Timestamp,
};
use shep_store::open_factory;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Veto hook run before every move: `(registry, item, from, to)`.
/// Returning `Err(reason)` rejects the transition.
pub type TransitionVerifier =
    Box<dyn Fn(&StateRegistry, &str, StateMask, StateMask) -> Result<(), String> + Send + Sync>;

/// Notification run after every put and move: `(item, from, to)`
pub type EventCallback = Box<dyn Fn(&str, Option<&str>, &str) + Send + Sync>;

/// Persisted state tracker
///
/// Every item lives in exactly one concrete state (the default state or
/// a base state). Aliases can be listed but never hold items.
///
/// A move writes the destination before removing the source. A crash in
/// between leaves the item in both partitions, which [`Self::sync`]
/// reports as corruption.
pub struct PersistedState {
    registry: StateRegistry,
    factory: Box<dyn StoreFactory>,
    /// item -> concrete state
    index: RwLock<HashMap<String, StateMask>>,
    verifier: Option<TransitionVerifier>,
    on_event: Option<EventCallback>,
}

impl PersistedState {
    pub fn new(registry: StateRegistry, factory: Box<dyn StoreFactory>) -> Self {
        Self {
            registry,
            factory,
            index: RwLock::new(HashMap::new()),
            verifier: None,
            on_event: None,
        }
    }
    
    /// Build registry and backend from configuration
    pub fn from_config(config: &ShepConfig) -> ShepResult<Self> {
        let registry =
            StateRegistry::new(config.bits)?.with_default_state(&config.default_state)?;
        let factory = open_factory(&config.backend)?;
        Ok(Self::new(registry, factory))
    }
    
    pub fn with_verifier<F>(mut self, verifier: F) -> Self
    where
        F: Fn(&StateRegistry, &str, StateMask, StateMask) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        self.verifier = Some(Box::new(verifier));
        self
    }
    
    pub fn with_event_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Option<&str>, &str) + Send + Sync + 'static,
    {
        self.on_event = Some(Box::new(callback));
        self
    }
    
    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }
    
    // ============ Vocabulary ============
    
    /// Register a base state and materialise its partition
    pub fn add(&mut self, name: &str) -> ShepResult<StateMask> {
        let mask = self.registry.add(name)?;
        self.factory.add(self.registry.name(mask)?)?;
        Ok(mask)
    }
    
    pub fn alias(&mut self, name: &str, mask: impl Into<StateMask>) -> ShepResult<StateMask> {
        self.registry.alias(name, mask)
    }
    
    pub fn alias_of(&mut self, name: &str, states: &[&str]) -> ShepResult<StateMask> {
        self.registry.alias_of(name, states)
    }
    
    /// Mask registered under `name`
    pub fn from_name(&self, name: &str) -> ShepResult<StateMask> {
        self.registry.from_name(name)
    }
    
    pub fn name(&self, mask: impl Into<StateMask>) -> ShepResult<&str> {
        self.registry.name(mask)
    }
    
    /// Restore the base states of a cold-started backend
    ///
    /// Bits follow allocation order, which the backend does not record,
    /// so the caller passes every base state name in the order it was
    /// first added. Names missing from the registry are added in that
    /// order, present in the backend or not, so each keeps the mask it
    /// had when written. A partition in the backend that `order` does not
    /// name fails with `StateInvalid` before anything is registered.
    /// Returns the names added.
    pub fn discover(&mut self, order: &[&str]) -> ShepResult<Vec<String>> {
        let order = order
            .iter()
            .map(|name| canonical_name(name))
            .collect::<ShepResult<Vec<String>>>()?;
        let unknown: Vec<String> = self
            .factory
            .ls()?
            .into_iter()
            .filter(|name| self.registry.get(name).is_none() && !order.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(ShepError::StateInvalid(format!(
                "no allocation order for persisted states {:?}",
                unknown
            )));
        }
        
        let mut added = Vec::new();
        for name in order {
            if self.registry.get(&name).is_some() {
                continue;
            }
            self.registry.add(&name)?;
            added.push(name);
        }
        if !added.is_empty() {
            info!("Discovered {} persisted states: {:?}", added.len(), added);
        }
        Ok(added)
    }
    
    // ============ Store resolution ============
    
    fn ensure_concrete(&self, state: StateMask) -> ShepResult<()> {
        if !self.registry.is_concrete(state) {
            let label = self
                .registry
                .name(state)
                .map(str::to_string)
                .unwrap_or_else(|_| state.to_string());
            return Err(ShepError::StateInvalid(format!(
                "{} is not a concrete state",
                label
            )));
        }
        Ok(())
    }
    
    fn store(&self, state: StateMask) -> ShepResult<Arc<dyn Store>> {
        self.ensure_concrete(state)?;
        self.factory.add(self.registry.name(state)?)
    }
    
    /// Whether the partition of `state` holds `item`. Partitions that do
    /// not exist yet are not created.
    fn holds(&self, state: StateMask, item: &str) -> ShepResult<bool> {
        match self.factory.lookup(self.registry.name(state)?)? {
            Some(store) => store.contains(item),
            None => Ok(false),
        }
    }
    
    /// Concrete state holding `item`
    ///
    /// An index entry is checked against its partition first, since
    /// another process sharing the backend may have moved or purged the
    /// item. Stale or missing entries fall back to probing every
    /// concrete partition.
    fn locate(&self, item: &str) -> ShepResult<Option<StateMask>> {
        let indexed = self.index.read().get(item).copied();
        if let Some(state) = indexed {
            if self.holds(state, item)? {
                return Ok(Some(state));
            }
            debug!("Dropping stale index entry for {}", item);
            self.index.write().remove(item);
        }
        
        let states: Vec<StateMask> = self.registry.concrete_states().map(|d| d.mask).collect();
        for state in states {
            if Some(state) == indexed {
                continue;
            }
            if self.holds(state, item)? {
                self.index.write().insert(item.to_string(), state);
                return Ok(Some(state));
            }
        }
        Ok(None)
    }
    
    fn require(&self, item: &str) -> ShepResult<StateMask> {
        self.locate(item)?
            .ok_or_else(|| ShepError::StateItemNotFound(item.to_string()))
    }
    
    fn notify(&self, item: &str, from: Option<StateMask>, to: StateMask) {
        if let Some(callback) = &self.on_event {
            let from = from.and_then(|s| self.registry.name(s).ok());
            if let Ok(to) = self.registry.name(to) {
                callback(item, from, to);
            }
        }
    }
    
    // ============ Item lifecycle ============
    
    /// Add `item` to the concrete `state`
    ///
    /// Missing content is stored as empty. With `track_modify` the
    /// modification time is recorded as well.
    pub fn put(
        &self,
        item: &str,
        state: StateMask,
        content: Option<&[u8]>,
        track_modify: bool,
    ) -> ShepResult<StateMask> {
        check_item_key(item)?;
        self.ensure_concrete(state)?;
        if self.locate(item)?.is_some() {
            return Err(ShepError::StateItemExists(item.to_string()));
        }
        
        let store = self.store(state)?;
        store.put(item, content.unwrap_or_default())?;
        self.index.write().insert(item.to_string(), state);
        if track_modify {
            store.register_modify(item)?;
        }
        
        debug!("put {} {}", item, store.name());
        self.notify(item, None, state);
        Ok(state)
    }
    
    /// Move `item` to the concrete state `to`
    ///
    /// Content and, if the item was tracked, a modification time later
    /// than the source one are written to the destination before the
    /// source entry is removed. Moving to the current state is a no-op.
    pub fn move_to(&self, item: &str, to: StateMask) -> ShepResult<StateMask> {
        let from = self.require(item)?;
        self.ensure_concrete(to)?;
        if from == to {
            return Ok(to);
        }
        
        if let Some(verifier) = &self.verifier {
            verifier(&self.registry, item, from, to).map_err(ShepError::StateTransitionInvalid)?;
        }
        
        let source = self.store(from)?;
        let target = self.store(to)?;
        
        let Some(content) = source.get(item)? else {
            // moved away after the lookup, start over from its new state
            self.index.write().remove(item);
            return self.move_to(item, to);
        };
        let previous = source.modified(item)?;
        
        target.put(item, &content)?;
        if previous.is_some() {
            target.register_modify_after(item, previous)?;
        }
        source.remove(item)?;
        self.index.write().insert(item.to_string(), to);
        
        debug!("move {} {} {}", item, source.name(), target.name());
        self.notify(item, Some(from), to);
        Ok(to)
    }
    
    /// Next single-bit state after the one `item` occupies, without moving
    pub fn peek(&self, item: &str) -> ShepResult<StateMask> {
        let current = self.require(item)?;
        let next = if current.is_empty() {
            Some(StateMask::bit(0))
        } else {
            current.value().checked_mul(2).map(StateMask)
        };
        match next {
            Some(next) if self.registry.is_concrete(next) => Ok(next),
            _ => Err(ShepError::StateInvalid(format!(
                "no state after {}",
                self.registry.name(current)?
            ))),
        }
    }
    
    /// Advance `item` to the next single-bit state
    pub fn next(&self, item: &str) -> ShepResult<StateMask> {
        let to = self.peek(item)?;
        self.move_to(item, to)
    }
    
    /// Overwrite the content of an existing item in place
    pub fn replace(&self, item: &str, content: &[u8]) -> ShepResult<()> {
        let state = self.require(item)?;
        self.store(state)?.replace(item, content)
    }
    
    /// Remove `item` from whatever state holds it
    pub fn purge(&self, item: &str) -> ShepResult<()> {
        let state = self.require(item)?;
        self.store(state)?.remove(item)?;
        self.index.write().remove(item);
        debug!("purge {} {}", item, self.registry.name(state)?);
        Ok(())
    }
    
    // ============ Queries ============
    
    /// Concrete state currently holding `item`
    pub fn state(&self, item: &str) -> ShepResult<StateMask> {
        self.require(item)
    }
    
    pub fn get(&self, item: &str) -> ShepResult<Vec<u8>> {
        let state = self.require(item)?;
        match self.store(state)?.get(item)? {
            Some(content) => Ok(content),
            None => {
                self.index.write().remove(item);
                self.get(item)
            }
        }
    }
    
    /// Items in `state`. An alias lists the items of all its base states.
    pub fn list(&self, state: StateMask) -> ShepResult<Vec<String>> {
        self.registry.name(state)?;
        if self.registry.is_concrete(state) {
            return self.store(state)?.keys();
        }
        
        let mut items = BTreeSet::new();
        for bit in state.bits() {
            items.extend(self.store(bit)?.keys()?);
        }
        Ok(items.into_iter().collect())
    }
    
    pub fn modified(&self, item: &str) -> ShepResult<Option<Timestamp>> {
        let state = self.require(item)?;
        self.store(state)?.modified(item)
    }
    
    pub fn register_modify(&self, item: &str) -> ShepResult<Timestamp> {
        let state = self.require(item)?;
        self.store(state)?.register_modify(item)
    }
    
    /// Number of indexed items
    pub fn len(&self) -> usize {
        self.index.read().len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
    
    // ============ Backend ============
    
    /// Rebuild the item index from every concrete partition.
    /// Returns the number of items found.
    pub fn sync(&self) -> ShepResult<usize> {
        let mut index = HashMap::new();
        for def in self.registry.concrete_states() {
            for item in self.store(def.mask)?.keys()? {
                if let Some(other) = index.insert(item.clone(), def.mask) {
                    warn!(
                        "Item {} found in both {} and {}",
                        item,
                        self.registry.name(other)?,
                        def.name
                    );
                    return Err(ShepError::StateCorruption(format!(
                        "{} is stored in more than one state",
                        item
                    )));
                }
            }
        }
        
        let count = index.len();
        *self.index.write() = index;
        info!("Synced {} items", count);
        Ok(count)
    }
    
    /// Partitions materialised in the backend
    pub fn ls(&self) -> ShepResult<Vec<String>> {
        self.factory.ls()
    }
    
    pub fn close(&self) -> ShepResult<()> {
        self.index.write().clear();
        self.factory.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shep_store::MemoryStoreFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    
    fn scenario() -> PersistedState {
        let registry = StateRegistry::new(4).unwrap();
        let mut state = PersistedState::new(registry, Box::new(MemoryStoreFactory::new()));
        state.add("foo").unwrap();
        state.add("bar").unwrap();
        state.add("baz").unwrap();
        state.alias("xyzzy", 6u64).unwrap();
        state
    }
    
    #[test]
    fn test_put_and_get() {
        let state = scenario();
        let foo = state.from_name("foo").unwrap();
        
        state.put("item1", foo, Some(b"hello"), false).unwrap();
        assert_eq!(state.state("item1").unwrap(), foo);
        assert_eq!(state.get("item1").unwrap(), b"hello".to_vec());
        assert_eq!(state.list(foo).unwrap(), vec!["item1"]);
    }
    
    #[test]
    fn test_put_default_state() {
        let state = scenario();
        state.put("item1", StateMask::EMPTY, None, false).unwrap();
        assert_eq!(state.state("item1").unwrap(), StateMask::EMPTY);
        assert_eq!(state.get("item1").unwrap(), Vec::<u8>::new());
        assert_eq!(state.name(state.state("item1").unwrap()).unwrap(), "NEW");
    }
    
    #[test]
    fn test_put_duplicate() {
        let state = scenario();
        state.put("item1", StateMask(1), None, false).unwrap();
        assert!(matches!(
            state.put("item1", StateMask(2), None, false),
            Err(ShepError::StateItemExists(_))
        ));
        assert!(state.list(StateMask(2)).unwrap().is_empty());
    }
    
    #[test]
    fn test_put_alias_rejected() {
        let state = scenario();
        assert!(matches!(
            state.put("item1", StateMask(6), None, false),
            Err(ShepError::StateInvalid(_))
        ));
        assert!(matches!(
            state.put("item1", StateMask(8), None, false),
            Err(ShepError::StateInvalid(_))
        ));
        assert!(state.is_empty());
    }
    
    #[test]
    fn test_move_scenario() {
        let state = scenario();
        let bar = state.from_name("bar").unwrap();
        let baz = state.from_name("baz").unwrap();
        let xyzzy = state.from_name("xyzzy").unwrap();
        
        state.put("item1", baz, Some(b"x"), false).unwrap();
        assert!(matches!(
            state.move_to("item1", xyzzy),
            Err(ShepError::StateInvalid(_))
        ));
        assert_eq!(state.state("item1").unwrap(), baz);
        
        state.move_to("item1", bar).unwrap();
        assert_eq!(state.list(bar).unwrap(), vec!["item1"]);
        assert!(state.list(baz).unwrap().is_empty());
        assert_eq!(state.get("item1").unwrap(), b"x".to_vec());
        assert_eq!(state.list(xyzzy).unwrap(), vec!["item1"]);
    }
    
    #[test]
    fn test_move_missing_item() {
        let state = scenario();
        assert!(matches!(
            state.move_to("ghost", StateMask(1)),
            Err(ShepError::StateItemNotFound(_))
        ));
    }
    
    #[test]
    fn test_move_same_state_noop() {
        let state = scenario();
        state.put("item1", StateMask(1), Some(b"x"), false).unwrap();
        assert_eq!(state.move_to("item1", StateMask(1)).unwrap(), StateMask(1));
        assert_eq!(state.list(StateMask(1)).unwrap(), vec!["item1"]);
    }
    
    #[test]
    fn test_move_carries_tracking() {
        let state = scenario();
        state.put("tracked", StateMask(1), None, true).unwrap();
        state.put("untracked", StateMask(1), None, false).unwrap();
        
        // quick successive updates run ahead of the clock
        state.register_modify("tracked").unwrap();
        state.register_modify("tracked").unwrap();
        let before = state.modified("tracked").unwrap().unwrap();
        
        state.move_to("tracked", StateMask(2)).unwrap();
        state.move_to("untracked", StateMask(2)).unwrap();
        
        assert!(state.modified("tracked").unwrap().unwrap() > before);
        assert_eq!(state.modified("untracked").unwrap(), None);
        
        let moved = state.modified("tracked").unwrap().unwrap();
        state.move_to("tracked", StateMask(4)).unwrap();
        assert!(state.modified("tracked").unwrap().unwrap() > moved);
    }
    
    #[test]
    fn test_peek_and_next() {
        let state = scenario();
        state.put("item1", StateMask::EMPTY, None, false).unwrap();
        
        assert_eq!(state.peek("item1").unwrap(), StateMask(1));
        assert_eq!(state.next("item1").unwrap(), StateMask(1));
        assert_eq!(state.next("item1").unwrap(), StateMask(2));
        assert_eq!(state.next("item1").unwrap(), StateMask(4));
        assert!(matches!(state.peek("item1"), Err(ShepError::StateInvalid(_))));
    }
    
    #[test]
    fn test_replace_and_purge() {
        let state = scenario();
        state.put("item1", StateMask(1), Some(b"one"), false).unwrap();
        state.replace("item1", b"two").unwrap();
        assert_eq!(state.get("item1").unwrap(), b"two".to_vec());
        
        state.purge("item1").unwrap();
        assert!(matches!(state.get("item1"), Err(ShepError::StateItemNotFound(_))));
        assert!(matches!(state.replace("item1", b"x"), Err(ShepError::StateItemNotFound(_))));
        state.put("item1", StateMask(2), None, false).unwrap();
    }
    
    #[test]
    fn test_verifier_rejects() {
        let state = scenario().with_verifier(|_, _, from, to| {
            if from == StateMask(4) && to == StateMask(1) {
                Err("baz may not return to foo".to_string())
            } else {
                Ok(())
            }
        });
        state.put("item1", StateMask(4), None, false).unwrap();
        
        assert!(matches!(
            state.move_to("item1", StateMask(1)),
            Err(ShepError::StateTransitionInvalid(_))
        ));
        assert_eq!(state.state("item1").unwrap(), StateMask(4));
        state.move_to("item1", StateMask(2)).unwrap();
    }
    
    #[test]
    fn test_event_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let state = scenario().with_event_callback(move |item, from, to| {
            assert_eq!(item, "item1");
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => assert_eq!((from, to), (None, "FOO")),
                _ => assert_eq!((from, to), (Some("FOO"), "BAR")),
            }
        });
        
        state.put("item1", StateMask(1), None, false).unwrap();
        state.move_to("item1", StateMask(2)).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
    
    #[test]
    fn test_stale_index_entry_is_revalidated() {
        let state = scenario();
        state.put("item1", StateMask(1), Some(b"x"), false).unwrap();
        assert_eq!(state.state("item1").unwrap(), StateMask(1));
        
        // another writer moves the item behind the index
        state.store(StateMask(2)).unwrap().put("item1", b"x").unwrap();
        state.store(StateMask(1)).unwrap().remove("item1").unwrap();
        
        assert_eq!(state.state("item1").unwrap(), StateMask(2));
        assert_eq!(state.get("item1").unwrap(), b"x".to_vec());
        state.move_to("item1", StateMask(4)).unwrap();
        assert_eq!(state.list(StateMask(4)).unwrap(), vec!["item1"]);
        
        // and purges it
        state.store(StateMask(4)).unwrap().remove("item1").unwrap();
        assert!(matches!(state.get("item1"), Err(ShepError::StateItemNotFound(_))));
        assert!(state.is_empty());
    }
    
    #[test]
    fn test_discover_keeps_allocation_order() {
        let factory = MemoryStoreFactory::new();
        for name in ["baz", "foo", "bar"] {
            factory.add(name).unwrap();
        }
        let mut state = PersistedState::new(StateRegistry::new(4).unwrap(), Box::new(factory));
        
        let added = state.discover(&["foo", "bar", "baz", "qux"]).unwrap();
        assert_eq!(added, vec!["FOO", "BAR", "BAZ", "QUX"]);
        assert_eq!(state.from_name("foo").unwrap(), StateMask(1));
        assert_eq!(state.from_name("bar").unwrap(), StateMask(2));
        assert_eq!(state.from_name("baz").unwrap(), StateMask(4));
        assert_eq!(state.from_name("qux").unwrap(), StateMask(8));
        assert!(state.discover(&["foo"]).unwrap().is_empty());
    }
    
    #[test]
    fn test_discover_rejects_unordered_partitions() {
        let factory = MemoryStoreFactory::new();
        factory.add("foo").unwrap();
        factory.add("bar").unwrap();
        let mut state = PersistedState::new(StateRegistry::new(4).unwrap(), Box::new(factory));
        
        assert!(matches!(
            state.discover(&["foo"]),
            Err(ShepError::StateInvalid(_))
        ));
        assert_eq!(state.registry().count(), 0);
        assert!(matches!(state.discover(&["foo", "b-r"]), Err(ShepError::InvalidName(_))));
    }
    
    #[test]
    fn test_sync_detects_duplicates() {
        let state = scenario();
        state.put("item1", StateMask(1), None, false).unwrap();
        assert_eq!(state.sync().unwrap(), 1);
        
        // simulate a crash between destination write and source removal
        state.store(StateMask(2)).unwrap().put("item1", b"").unwrap();
        assert!(matches!(state.sync(), Err(ShepError::StateCorruption(_))));
    }
}
