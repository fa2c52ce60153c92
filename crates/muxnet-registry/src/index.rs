//! Ordered and hash indices
//!
//! - **OrderedIndex**: `Fqa` → value, iterated in address order, so all
//!   devices of one module (and one sub-bus) are adjacent
//! - **HashIndex**: identifier → value
//!
//! Both own their values outright. Cross-references between the two (a
//! group's member list, a routing entry's identifier) are plain keys, never
//! pointers, so removing an entry can't leave a dangling reference behind.

use std::collections::btree_map;
use std::collections::hash_map;
use std::collections::{BTreeMap, HashMap};

use muxnet_core::{Fqa, MuxnetError, Result};

// ============================================================================
// Ordered Index
// ============================================================================

/// Address-ordered map from [`Fqa`] to an owned value
#[derive(Debug, Clone)]
pub struct OrderedIndex<V> {
    entries: BTreeMap<Fqa, V>,
}

impl<V> OrderedIndex<V> {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert a new entry; an address may only be present once
    pub fn insert(&mut self, fqa: Fqa, value: V) -> Result<()> {
        if !fqa.is_valid() {
            return Err(MuxnetError::InvalidAddress {
                bus: fqa.bus(),
                module: fqa.module(),
                subbus: fqa.subbus(),
                address: fqa.address(),
            });
        }
        match self.entries.entry(fqa) {
            btree_map::Entry::Occupied(_) => Err(MuxnetError::DuplicateAddress(fqa)),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Look up an entry
    pub fn get(&self, fqa: Fqa) -> Option<&V> {
        self.entries.get(&fqa)
    }

    /// Look up an entry mutably
    pub fn get_mut(&mut self, fqa: Fqa) -> Option<&mut V> {
        self.entries.get_mut(&fqa)
    }

    /// Remove an entry, handing back its value
    pub fn remove(&mut self, fqa: Fqa) -> Option<V> {
        self.entries.remove(&fqa)
    }

    /// Check whether an address is present
    pub fn contains(&self, fqa: Fqa) -> bool {
        self.entries.contains_key(&fqa)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in address order
    pub fn iter(&self) -> impl Iterator<Item = (Fqa, &V)> {
        self.entries.iter().map(|(fqa, value)| (*fqa, value))
    }

    /// Mutable entries in address order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Fqa, &mut V)> {
        self.entries.iter_mut().map(|(fqa, value)| (*fqa, value))
    }

    /// Addresses in order
    pub fn keys(&self) -> impl Iterator<Item = Fqa> + '_ {
        self.entries.keys().copied()
    }

    /// Entries behind one module, in address order
    pub fn module_range(&self, bus: u8, module: u8) -> impl Iterator<Item = (Fqa, &V)> {
        let start = Fqa::encode(bus, module, 0, 0).raw();
        let end = Fqa::encode(bus, module, 7, 127).raw();
        self.entries
            .range(Fqa::from_raw(start)..=Fqa::from_raw(end))
            .map(|(fqa, value)| (*fqa, value))
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<V> Default for OrderedIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Hash Index
// ============================================================================

/// Map from identifier string to an owned value
#[derive(Debug, Clone)]
pub struct HashIndex<V> {
    entries: HashMap<String, V>,
}

impl<V> HashIndex<V> {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Look up an entry
    pub fn get(&self, identifier: &str) -> Option<&V> {
        self.entries.get(identifier)
    }

    /// Look up an entry mutably
    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut V> {
        self.entries.get_mut(identifier)
    }

    /// Look up an entry, creating it on a miss
    ///
    /// The flag is `true` when the entry was just created.
    pub fn get_or_insert_with(
        &mut self,
        identifier: &str,
        create: impl FnOnce() -> V,
    ) -> (&mut V, bool) {
        match self.entries.entry(identifier.to_string()) {
            hash_map::Entry::Occupied(slot) => (slot.into_mut(), false),
            hash_map::Entry::Vacant(slot) => (slot.insert(create()), true),
        }
    }

    /// Insert or replace an entry, returning the previous value
    pub fn insert(&mut self, identifier: impl Into<String>, value: V) -> Option<V> {
        self.entries.insert(identifier.into(), value)
    }

    /// Remove an entry
    pub fn remove(&mut self, identifier: &str) -> Option<V> {
        self.entries.remove(identifier)
    }

    /// Check whether an identifier is present
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .iter()
            .map(|(identifier, value)| (identifier.as_str(), value))
    }

    /// Identifiers in arbitrary order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<V> Default for HashIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_insert_and_duplicate() {
        let mut index = OrderedIndex::new();
        let fqa = Fqa::encode(0, 1, 2, 0x40);

        index.insert(fqa, "a").unwrap();
        assert!(matches!(
            index.insert(fqa, "b"),
            Err(MuxnetError::DuplicateAddress(_))
        ));
        assert_eq!(index.get(fqa), Some(&"a"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_ordered_rejects_invalid() {
        let mut index = OrderedIndex::new();
        assert!(index.insert(Fqa::INVALID, ()).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_ordered_iteration_is_sorted() {
        let mut index = OrderedIndex::new();
        let addresses = [
            Fqa::encode(1, 0, 0, 5),
            Fqa::encode(0, 2, 3, 9),
            Fqa::encode(0, 2, 0, 100),
            Fqa::encode(0, 0, 7, 1),
        ];
        for fqa in addresses {
            index.insert(fqa, ()).unwrap();
        }
        let keys: Vec<Fqa> = index.keys().collect();
        let mut sorted = addresses.to_vec();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_module_range() {
        let mut index = OrderedIndex::new();
        index.insert(Fqa::encode(0, 1, 0, 0x50), 1).unwrap();
        index.insert(Fqa::encode(0, 1, 7, 0x7F), 2).unwrap();
        index.insert(Fqa::encode(0, 2, 0, 0x01), 3).unwrap();
        index.insert(Fqa::encode(1, 1, 0, 0x50), 4).unwrap();

        let values: Vec<i32> = index.module_range(0, 1).map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_ordered_remove() {
        let mut index = OrderedIndex::new();
        let fqa = Fqa::encode(0, 0, 1, 1);
        index.insert(fqa, 7).unwrap();
        assert_eq!(index.remove(fqa), Some(7));
        assert_eq!(index.remove(fqa), None);
        assert!(!index.contains(fqa));
    }

    #[test]
    fn test_hash_get_or_insert_with() {
        let mut index: HashIndex<Vec<u8>> = HashIndex::new();
        let (entry, created) = index.get_or_insert_with("sensor", Vec::new);
        assert!(created);
        entry.push(1);

        let (entry, created) = index.get_or_insert_with("sensor", Vec::new);
        assert!(!created);
        assert_eq!(entry, &vec![1]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_hash_remove() {
        let mut index = HashIndex::new();
        assert!(index.insert("display", 3).is_none());
        assert_eq!(index.insert("display", 4), Some(3));
        assert_eq!(index.remove("display"), Some(4));
        assert!(index.is_empty());
    }
}
