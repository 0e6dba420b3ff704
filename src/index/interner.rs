//! String interning for tracks and attribute values
//!
//! Strings get dense indices in insertion order, which is what nodes and
//! manifests store. Only [`StringInterner::reorder`] changes assigned indices.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Bidirectional string ↔ dense index map
#[derive(Debug, Clone, Default)]
pub struct StringInterner {
    /// Strings indexed by position
    values: Vec<String>,
    /// String to index lookup
    lookup: HashMap<String, u32>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted dictionary; duplicate entries keep the first index
    pub fn from_values(values: Vec<String>) -> Self {
        let mut interner = Self::new();
        for value in values {
            interner.insert(&value);
        }
        interner
    }

    /// Intern a string, returning its index (existing or newly assigned)
    pub fn insert(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.lookup.get(value) {
            return index;
        }

        let index = self.values.len() as u32;
        self.values.push(value.to_string());
        self.lookup.insert(value.to_string(), index);
        index
    }

    pub fn index_of(&self, value: &str) -> Option<u32> {
        self.lookup.get(value).copied()
    }

    /// Index of a string, or `len()` when absent
    pub fn lookup_or_len(&self, value: &str) -> u32 {
        self.index_of(value).unwrap_or(self.values.len() as u32)
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.values.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u32, v.as_str()))
    }

    /// Re-sort the strings and rebuild the lookup
    ///
    /// Returns the permutation `old index → new index` so callers can move
    /// any data they keep per index.
    pub fn reorder<F>(&mut self, mut cmp: F) -> Vec<u32>
    where
        F: FnMut(&str, &str) -> Ordering,
    {
        let mut order: Vec<u32> = (0..self.values.len() as u32).collect();
        order.sort_by(|&a, &b| cmp(&self.values[a as usize], &self.values[b as usize]));

        let mut old_to_new = vec![0u32; self.values.len()];
        for (new, &old) in order.iter().enumerate() {
            old_to_new[old as usize] = new as u32;
        }

        let mut slots: Vec<Option<String>> = std::mem::take(&mut self.values)
            .into_iter()
            .map(Some)
            .collect();
        self.values = order
            .iter()
            .filter_map(|&old| slots[old as usize].take())
            .collect();

        self.lookup = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i as u32))
            .collect();

        old_to_new
    }
}

/// Track ordering that keeps numbered tracks in numeric order
///
/// Integers sort numerically and before any other name; other names sort
/// lexicographically.
pub fn natural_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// One interner per attribute key
#[derive(Debug, Clone, Default)]
pub struct AttributeDictionary {
    keys: BTreeMap<String, StringInterner>,
}

impl AttributeDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, key: &str, value: &str) -> u32 {
        if let Some(interner) = self.keys.get_mut(key) {
            return interner.insert(value);
        }
        let mut interner = StringInterner::new();
        let index = interner.insert(value);
        self.keys.insert(key.to_string(), interner);
        index
    }

    /// Resolve a value to its index; `None` if the key or value was never seen
    pub fn resolve(&self, key: &str, value: &str) -> Option<u32> {
        self.keys.get(key).and_then(|interner| interner.index_of(value))
    }

    pub fn value(&self, key: &str, index: u32) -> Option<&str> {
        self.keys.get(key).and_then(|interner| interner.get(index))
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn interner(&self, key: &str) -> Option<&StringInterner> {
        self.keys.get(key)
    }

    /// Flatten into the manifest representation
    pub fn to_manifest(&self) -> BTreeMap<String, Vec<String>> {
        self.keys
            .iter()
            .map(|(key, interner)| (key.clone(), interner.values().to_vec()))
            .collect()
    }

    pub fn from_manifest(manifest: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            keys: manifest
                .into_iter()
                .map(|(key, values)| (key, StringInterner::from_values(values)))
                .collect(),
        }
    }
}
