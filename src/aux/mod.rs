// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The auxiliary view: a parallel scan that bridges the versioned sparse
//! array to array-indexed analytical workloads (§4.10, §4.11).

pub mod builder;
pub mod counting_tree;
pub mod partial_result;
pub mod view;

pub use builder::{build_static_view, merge_partial_results, DegreeEntry};
pub use counting_tree::CountingTree;
pub use partial_result::PartialResult;
pub use view::AuxView;

use std::sync::Arc;

use crate::config::Config;
use crate::index::FatTreeIndex;
use crate::key::Key;
use crate::seqno::SeqNo;

/// Scans the whole keyspace, range by range, building a merged aux view.
///
/// Each range is scanned sequentially here; the original design dispatches
/// one worker thread per range (§4.10). A single engine-wide thread pool for
/// this is an external collaborator per spec.md's non-goals, so ranges are
/// processed in a tight loop — the merge step (which does need to preserve
/// issue order) is unaffected by how the scanning itself is scheduled.
#[must_use]
pub fn scan_and_build(index: &FatTreeIndex, read_ts: SeqNo, num_ranges: usize, config: &Config) -> AuxView {
    let ranges = partition_keyspace(num_ranges.max(1));

    let partials: Vec<PartialResult> = ranges
        .into_iter()
        .map(|range| scan_range(index, range, read_ts))
        .collect();

    let degree_vector = merge_partial_results(partials);
    build_static_view(degree_vector, config)
}

fn partition_keyspace(num_ranges: usize) -> Vec<std::ops::Range<Key>> {
    if num_ranges <= 1 {
        return vec![Key::MIN..Key::MAX];
    }

    let span = u64::MAX / num_ranges as u64;
    let mut ranges = Vec::with_capacity(num_ranges);
    let mut start = 0u64;

    for i in 0..num_ranges {
        let end = if i + 1 == num_ranges { u64::MAX } else { start.saturating_add(span) };
        ranges.push(Key::new(start, 0)..Key::new(end, 0));
        start = end;
    }

    ranges
}

fn scan_range(index: &FatTreeIndex, range: std::ops::Range<Key>, read_ts: SeqNo) -> PartialResult {
    let mut partial = PartialResult::new();
    let mut cursor = range.start;

    loop {
        let Some(entry) = index.find(cursor) else { break };
        let Some(segment) = entry.leaf.segment(entry.segment_id) else {
            break;
        };

        segment.aux_partial_result(cursor..range.end, read_ts, &mut partial);

        let next_fence = entry.leaf.segment_high_fence_key(entry.segment_id);
        if next_fence >= range.end || next_fence <= cursor {
            break;
        }
        cursor = next_fence;
    }

    partial
}

/// A per-engine cache mapping the last committing read-write transaction's
/// id to its aux view; invalidated whenever a new read-write transaction
/// commits (§4.10).
#[derive(Default)]
pub struct AuxViewCache {
    inner: std::sync::Mutex<Option<(u64, Arc<AuxView>)>>,
}

impl AuxViewCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached view if it was built for `last_committing_txn_id`.
    #[must_use]
    pub fn get(&self, last_committing_txn_id: u64) -> Option<Arc<AuxView>> {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|(id, _)| *id == last_committing_txn_id)
            .map(|(_, view)| Arc::clone(view))
    }

    pub fn set(&self, last_committing_txn_id: u64, view: Arc<AuxView>) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some((last_committing_txn_id, view));
    }

    pub fn invalidate(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn cache_misses_for_a_different_committing_txn() {
        let cache = AuxViewCache::new();
        cache.set(1, Arc::new(AuxView::Static {
            degree_vector: Vec::new(),
            lookup: view::HashBackedLookup::direct(&[], 0),
        }));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn invalidate_clears_the_cache() {
        let cache = AuxViewCache::new();
        cache.set(1, Arc::new(AuxView::Static {
            degree_vector: Vec::new(),
            lookup: view::HashBackedLookup::direct(&[], 0),
        }));
        cache.invalidate();
        assert!(cache.get(1).is_none());
    }
}
