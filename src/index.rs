// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fat-tree index: an ordered map from `Key` to `(leaf, segment_id)`
//! (§4.5). The original design used an ART-style trie; its contract is
//! consumed, not redesigned — a correct concurrent ordered map suffices, so
//! this wraps [`crossbeam_skiplist::SkipMap`], already used elsewhere in
//! this codebase as the lock-free ordered structure of choice.

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::key::Key;
use crate::leaf::Leaf;

/// What `find` resolves a key to: a leaf and the segment within it.
#[derive(Clone)]
pub struct IndexEntry {
    pub leaf: Arc<Leaf>,
    pub segment_id: u16,
}

impl IndexEntry {
    #[must_use]
    pub fn new(leaf: Arc<Leaf>, segment_id: u16) -> Self {
        Self { leaf, segment_id }
    }
}

/// The engine-wide fat-tree index, keyed by each segment's low fence key.
#[derive(Default)]
pub struct FatTreeIndex {
    entries: SkipMap<Key, IndexEntry>,
}

impl FatTreeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key` to the segment responsible for it: the entry at the
    /// greatest indexed key `<= key`.
    #[must_use]
    pub fn find(&self, key: Key) -> Option<IndexEntry> {
        self.entries.range(..=key).next_back().map(|entry| entry.value().clone())
    }

    /// Registers a new segment's low fence key. Called only by the
    /// rebalancer, with the owning segment in `REBAL` state.
    pub fn insert(&self, key: Key, entry: IndexEntry) {
        self.entries.insert(key, entry);
    }

    /// Removes a segment's fence-key entry. Called only by the rebalancer.
    pub fn remove(&self, key: Key) {
        self.entries.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every leaf reachable from the index, deduplicated, in
    /// key order. Used by the merger to iterate leaves without holding any
    /// latch across the traversal (§4.9).
    #[must_use]
    pub fn snapshot_leaves(&self) -> Vec<Arc<Leaf>> {
        let mut leaves: Vec<Arc<Leaf>> = Vec::new();
        for entry in self.entries.iter() {
            let leaf = &entry.value().leaf;
            if !leaves.iter().any(|l| Arc::ptr_eq(l, leaf)) {
                leaves.push(Arc::clone(leaf));
            }
        }
        leaves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn find_resolves_to_greatest_key_not_exceeding_lookup() {
        let index = FatTreeIndex::new();
        let leaf = Leaf::new(1);
        index.insert(Key::MIN, IndexEntry::new(Arc::clone(&leaf), 0));
        index.insert(Key::vertex(100), IndexEntry::new(Arc::clone(&leaf), 0));

        let found = index.find(Key::vertex(50)).unwrap();
        assert_eq!(found.segment_id, 0);

        assert!(index.find(Key::MIN).is_some());
    }

    #[test]
    fn remove_drops_the_entry() {
        let index = FatTreeIndex::new();
        let leaf = Leaf::new(1);
        index.insert(Key::vertex(10), IndexEntry::new(leaf, 0));
        index.remove(Key::vertex(10));
        assert!(index.find(Key::vertex(10)).is_none());
    }
}
