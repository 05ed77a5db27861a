//! Secondary index over `(sort_key, partition_key)`.
//!
//! Holds key tuples only, never record data. The memory store updates it in
//! the same write section as the primary map, so every entry points at a
//! stored record and every stored record has exactly one entry.

use std::collections::BTreeSet;
use std::ops::Bound;

use super::key::prefix_successor;

/// Ordered set of `(sort_key, partition_key)` pairs.
#[derive(Debug, Default, Clone)]
pub struct SecondaryIndex {
    entries: BTreeSet<(String, String)>,
}

impl SecondaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the entry for a stored record. Re-inserting is a no-op.
    pub fn insert(&mut self, partition_key: &str, sort_key: &str) {
        self.entries
            .insert((sort_key.to_string(), partition_key.to_string()));
    }

    /// Drop the entry for a removed record. Returns whether it existed.
    pub fn remove(&mut self, partition_key: &str, sort_key: &str) -> bool {
        self.entries
            .remove(&(sort_key.to_string(), partition_key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose sort key starts with `prefix`, as `(sort_key, partition_key)`,
    /// in ascending order.
    ///
    /// Lazy range scan over `[prefix, successor(prefix))`; calling it again
    /// restarts from the beginning.
    pub fn prefix<'a>(&'a self, prefix: &str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let start = Bound::Included((prefix.to_string(), String::new()));
        let end = match prefix_successor(prefix) {
            Some(next) => Bound::Excluded((next, String::new())),
            None => Bound::Unbounded,
        };
        self.entries
            .range((start, end))
            .map(|(sort_key, partition_key)| (sort_key.as_str(), partition_key.as_str()))
    }

    /// Every entry, as `(sort_key, partition_key)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(sort_key, partition_key)| (sort_key.as_str(), partition_key.as_str()))
    }
}
