// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The order-statistic structure backing the dynamic aux view (§4.11).
//!
//! A genuine B⁺-tree, keyed by `vertex_id`: leaves hold items directly,
//! internal nodes hold separator keys plus the cardinality of each child
//! subtree, so `get_by_rank`/`get_by_vertex_id` descend in `O(log n)`
//! instead of scanning a flat array. Leaf and internal fanout are runtime
//! knobs (`aux_counting_tree_capacity_{leaves,inodes}`) rather than the
//! compile-time constants of the original design (§B).
//!
//! Deletion removes the item from its leaf and decrements ancestor counts
//! but never merges or rotates underflowing nodes back together — the
//! redesign note about the leaf-rotation-right underflow bug (§9) is
//! sidestepped by not implementing rotation at all. A leaf may end up
//! under `leaf_capacity / 2` after heavy removal; that only costs a little
//! extra tree depth, never correctness, since rank and membership queries
//! don't assume any minimum occupancy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::vertex_table::DirectPointer;

/// One item of the counting tree.
#[derive(Clone, Debug)]
pub struct Item {
    pub vertex_id: u64,
    pub degree: u64,
    pub pointer: Option<DirectPointer>,
}

/// Returns the index of the child that must hold `vertex_id`, given a
/// node's separator keys (`keys[i]` is the smallest key in `children[i+1]`).
fn child_index(keys: &[u64], vertex_id: u64) -> usize {
    keys.partition_point(|&key| key <= vertex_id)
}

enum Node {
    Leaf(Vec<Item>),
    Internal {
        keys: Vec<u64>,
        children: Vec<Node>,
        /// `counts[i]` is the number of items in `children[i]`'s subtree.
        counts: Vec<u64>,
    },
}

/// Result of an insert that overflowed a node: the new sibling plus the key
/// that should separate it from its left neighbour in the parent.
struct Split {
    separator: u64,
    right: Node,
}

impl Node {
    fn len(&self) -> u64 {
        match self {
            Self::Leaf(items) => items.len() as u64,
            Self::Internal { counts, .. } => counts.iter().sum(),
        }
    }

    fn total_degree(&self) -> u64 {
        match self {
            Self::Leaf(items) => items.iter().map(|item| item.degree).sum(),
            Self::Internal { children, .. } => children.iter().map(Self::total_degree).sum(),
        }
    }

    fn get_by_rank(&self, rank: u64) -> Option<Item> {
        match self {
            Self::Leaf(items) => items.get(rank as usize).cloned(),
            Self::Internal { children, counts, .. } => {
                let mut remaining = rank;
                for (child, count) in children.iter().zip(counts) {
                    if remaining < *count {
                        return child.get_by_rank(remaining);
                    }
                    remaining -= count;
                }
                None
            }
        }
    }

    fn get_by_vertex_id(&self, vertex_id: u64) -> Option<(Item, u64)> {
        match self {
            Self::Leaf(items) => {
                let pos = items.binary_search_by_key(&vertex_id, |item| item.vertex_id).ok()?;
                Some((items[pos].clone(), pos as u64))
            }
            Self::Internal { keys, children, counts } => {
                let idx = child_index(keys, vertex_id);
                let (item, local_rank) = children[idx].get_by_vertex_id(vertex_id)?;
                let offset: u64 = counts[..idx].iter().sum();
                Some((item, offset + local_rank))
            }
        }
    }

    fn change_degree(&mut self, vertex_id: u64, diff: i64) -> bool {
        match self {
            Self::Leaf(items) => match items.binary_search_by_key(&vertex_id, |item| item.vertex_id) {
                Ok(pos) => {
                    items[pos].degree = items[pos].degree.saturating_add_signed(diff);
                    true
                }
                Err(_) => false,
            },
            Self::Internal { keys, children, .. } => {
                let idx = child_index(keys, vertex_id);
                children[idx].change_degree(vertex_id, diff)
            }
        }
    }

    fn remove(&mut self, vertex_id: u64) -> bool {
        match self {
            Self::Leaf(items) => match items.binary_search_by_key(&vertex_id, |item| item.vertex_id) {
                Ok(pos) => {
                    items.remove(pos);
                    true
                }
                Err(_) => false,
            },
            Self::Internal { keys, children, counts } => {
                let idx = child_index(keys, vertex_id);
                let removed = children[idx].remove(vertex_id);
                if removed {
                    counts[idx] -= 1;
                }
                removed
            }
        }
    }

    /// Inserts `vertex_id`, returning its rank within this subtree and, if
    /// this node overflowed its capacity, the sibling it split into.
    fn insert(&mut self, vertex_id: u64, pointer: Option<DirectPointer>, leaf_capacity: usize, inode_capacity: usize) -> (u64, Option<Split>) {
        match self {
            Self::Leaf(items) => {
                let pos = items.partition_point(|item| item.vertex_id < vertex_id);
                items.insert(
                    pos,
                    Item {
                        vertex_id,
                        degree: 0,
                        pointer,
                    },
                );

                if items.len() > leaf_capacity {
                    let mid = items.len() / 2;
                    let right_items = items.split_off(mid);
                    let separator = right_items[0].vertex_id;
                    (pos as u64, Some(Split { separator, right: Self::Leaf(right_items) }))
                } else {
                    (pos as u64, None)
                }
            }
            Self::Internal { keys, children, counts } => {
                let idx = child_index(keys, vertex_id);
                let offset: u64 = counts[..idx].iter().sum();
                let (local_rank, split) = children[idx].insert(vertex_id, pointer, leaf_capacity, inode_capacity);
                counts[idx] += 1;
                let rank = offset + local_rank;

                let Some(Split { separator, right }) = split else {
                    return (rank, None);
                };

                let right_count = right.len();
                // `counts[idx]` currently holds the whole post-insert subtree
                // (left + right); now that it's split in two, give the right
                // half its own entry and shrink `counts[idx]` to match.
                counts[idx] -= right_count;
                keys.insert(idx, separator);
                children.insert(idx + 1, right);
                counts.insert(idx + 1, right_count);

                if children.len() <= inode_capacity {
                    return (rank, None);
                }

                let mid = children.len() / 2;
                let right_children = children.split_off(mid);
                let right_counts = counts.split_off(mid);
                let right_keys = keys.split_off(mid);
                let promoted = keys.pop().expect("an internal node about to split has at least one key");

                (
                    rank,
                    Some(Split {
                        separator: promoted,
                        right: Self::Internal {
                            keys: right_keys,
                            children: right_children,
                            counts: right_counts,
                        },
                    }),
                )
            }
        }
    }
}

struct Inner {
    root: Node,
    leaf_capacity: usize,
    inode_capacity: usize,
}

/// A mutable, rank-queryable index over `(vertex_id, degree, pointer)`.
pub struct CountingTree {
    inner: RwLock<Inner>,
    version: AtomicU64,
}

/// Capacities used by [`CountingTree::new`]; callers wiring up a real engine
/// should use [`CountingTree::with_capacity`] with the configured knobs instead.
const DEFAULT_LEAF_CAPACITY: usize = 64;
const DEFAULT_INODE_CAPACITY: usize = 64;

impl Default for CountingTree {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEAF_CAPACITY, DEFAULT_INODE_CAPACITY)
    }
}

impl CountingTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree with the given leaf/internal-node fanout.
    /// Capacities below 2 would make every insert split immediately, so
    /// they're floored at 2.
    #[must_use]
    pub fn with_capacity(leaf_capacity: usize, inode_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                root: Node::Leaf(Vec::new()),
                leaf_capacity: leaf_capacity.max(2),
                inode_capacity: inode_capacity.max(2),
            }),
            version: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner).root.len() as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a new vertex, returning its rank (`logical_id`).
    pub fn insert_vertex(&self, vertex_id: u64, pointer: Option<DirectPointer>) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (leaf_capacity, inode_capacity) = (inner.leaf_capacity, inner.inode_capacity);
        let (rank, split) = inner.root.insert(vertex_id, pointer, leaf_capacity, inode_capacity);

        if let Some(Split { separator, right }) = split {
            let left = std::mem::replace(&mut inner.root, Node::Leaf(Vec::new()));
            let left_count = left.len();
            let right_count = right.len();
            inner.root = Node::Internal {
                keys: vec![separator],
                children: vec![left, right],
                counts: vec![left_count, right_count],
            };
        }

        self.version.fetch_add(1, Ordering::AcqRel);
        rank
    }

    pub fn remove_vertex(&self, vertex_id: u64) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.root.remove(vertex_id) {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn change_degree(&self, vertex_id: u64, diff: i64) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.root.change_degree(vertex_id, diff) {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[must_use]
    pub fn get_by_rank(&self, rank: u64) -> Option<Item> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.root.get_by_rank(rank)
    }

    #[must_use]
    pub fn get_by_vertex_id(&self, vertex_id: u64) -> Option<(Item, u64)> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.root.get_by_vertex_id(vertex_id)
    }

    #[must_use]
    pub fn rank_of(&self, vertex_id: u64) -> Option<u64> {
        self.get_by_vertex_id(vertex_id).map(|(_, rank)| rank)
    }

    #[must_use]
    pub fn total_degree(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.root.total_degree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn insert_then_rank_lookup_roundtrips() {
        let tree = CountingTree::new();
        tree.insert_vertex(30, None);
        tree.insert_vertex(10, None);
        tree.insert_vertex(20, None);

        // sorted by vertex_id: 10, 20, 30
        assert_eq!(tree.rank_of(10), Some(0));
        assert_eq!(tree.rank_of(20), Some(1));
        assert_eq!(tree.rank_of(30), Some(2));
        assert_eq!(tree.get_by_rank(1).unwrap().vertex_id, 20);
    }

    #[test]
    fn change_degree_updates_in_place() {
        let tree = CountingTree::new();
        tree.insert_vertex(1, None);
        tree.change_degree(1, 5);
        tree.change_degree(1, -2);
        assert_eq!(tree.get_by_vertex_id(1).unwrap().0.degree, 3);
    }

    #[test]
    fn remove_vertex_shrinks_and_shifts_ranks() {
        let tree = CountingTree::new();
        tree.insert_vertex(10, None);
        tree.insert_vertex(20, None);
        tree.remove_vertex(10);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.rank_of(20), Some(0));
    }

    #[test]
    fn small_leaf_capacity_forces_real_tree_growth() {
        // A capacity of 2 forces splits almost immediately, so this
        // exercises leaf splits and at least one internal-node split.
        let tree = CountingTree::with_capacity(2, 2);
        let ids: Vec<u64> = (0..200).collect();
        for &id in &ids {
            tree.insert_vertex(id, None);
        }

        assert_eq!(tree.len(), 200);
        for (rank, &id) in ids.iter().enumerate() {
            assert_eq!(tree.rank_of(id), Some(rank as u64));
            assert_eq!(tree.get_by_rank(rank as u64).unwrap().vertex_id, id);
        }
    }

    #[test]
    fn shuffled_inserts_still_land_in_sorted_rank_order() {
        let tree = CountingTree::with_capacity(3, 3);
        let ids = [50_u64, 10, 90, 30, 70, 20, 80, 40, 60, 0];
        for &id in &ids {
            tree.insert_vertex(id, None);
        }

        let mut sorted = ids;
        sorted.sort_unstable();
        for (rank, &id) in sorted.iter().enumerate() {
            assert_eq!(tree.rank_of(id), Some(rank as u64));
        }
    }

    #[test]
    fn removal_after_many_splits_keeps_ranks_consistent() {
        let tree = CountingTree::with_capacity(4, 4);
        for id in 0..100u64 {
            tree.insert_vertex(id, None);
        }
        for id in (0..100u64).step_by(2) {
            tree.remove_vertex(id);
        }

        assert_eq!(tree.len(), 50);
        let remaining: Vec<u64> = (0..100).step_by(2).map(|id| id + 1).collect();
        for (rank, &id) in remaining.iter().enumerate() {
            assert_eq!(tree.rank_of(id), Some(rank as u64));
        }
    }
}
