//! Index implementation
//!
//! BTreeMap-based ordered index with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::Location;

/// Ordered key → location map
#[derive(Default)]
pub struct Index {
    tree: RwLock<BTreeMap<Vec<u8>, Location>>,
}

impl Index {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of `key` (read lock)
    pub fn get(&self, key: &[u8]) -> Option<Location> {
        self.tree.read().get(key).cloned()
    }

    /// Insert or replace `key` (write lock)
    ///
    /// Returns the previous location and whether one was replaced.
    pub fn put(&self, key: Vec<u8>, location: Location) -> (Option<Location>, bool) {
        let old = self.tree.write().insert(key, location);
        let updated = old.is_some();
        (old, updated)
    }

    /// Remove `key` (write lock)
    ///
    /// Returns the removed location and whether anything was removed.
    pub fn delete(&self, key: &[u8]) -> (Option<Location>, bool) {
        let old = self.tree.write().remove(key);
        let updated = old.is_some();
        (old, updated)
    }

    /// Replace the location of `key` only if it still points where `expected` does
    pub fn compare_and_put(&self, key: &[u8], expected: &Location, location: Location) -> bool {
        let mut tree = self.tree.write();
        match tree.get_mut(key) {
            Some(current) if current.same_position(expected) => {
                *current = location;
                true
            }
            _ => false,
        }
    }

    /// Remove `key` only if it still points where `expected` does
    pub fn compare_and_delete(&self, key: &[u8], expected: &Location) -> Option<Location> {
        let mut tree = self.tree.write();
        match tree.get(key) {
            Some(current) if current.same_position(expected) => tree.remove(key),
            _ => None,
        }
    }

    /// Up to `limit` keys starting with `prefix`, in key order.
    ///
    /// A `limit` of 0 returns nothing; an empty prefix matches every key.
    pub fn prefix_scan(&self, prefix: &[u8], limit: usize) -> Vec<Vec<u8>> {
        if limit == 0 {
            return Vec::new();
        }

        let tree = self.tree.read();
        tree.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Iterate all entries in key order (snapshot taken under the read lock)
    pub fn iter(&self) -> IndexIter {
        let entries: Vec<_> = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        IndexIter {
            inner: entries.into_iter(),
        }
    }

    /// Whether any key points into file `fid`
    pub fn references(&self, fid: u32) -> bool {
        self.tree.read().values().any(|location| location.fid == fid)
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}

/// Forward iterator over index entries
pub struct IndexIter {
    inner: std::vec::IntoIter<(Vec<u8>, Location)>,
}

impl Iterator for IndexIter {
    type Item = (Vec<u8>, Location);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
