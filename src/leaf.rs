// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A leaf: a fixed array of segments plus a leaf-wide latch serialising
//! structural changes (split/merge) and the leaf's high fence key (§4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::key::Key;
use crate::segment::Segment;

/// Fixed array of segments sharing one high fence key and one coarse latch.
pub struct Leaf {
    segments: Vec<Segment>,
    high_fence_key: AtomicHighFenceKey,
    /// Serialises split/merge; held only by the rebalancer while it owns
    /// this leaf's window.
    structural_latch: Mutex<()>,
    next: std::sync::RwLock<Option<std::sync::Arc<Leaf>>>,
}

struct AtomicHighFenceKey {
    source: AtomicU64,
    destination: AtomicU64,
}

impl AtomicHighFenceKey {
    fn new(key: Key) -> Self {
        Self {
            source: AtomicU64::new(key.source),
            destination: AtomicU64::new(key.destination),
        }
    }

    fn get(&self) -> Key {
        Key::new(self.source.load(Ordering::Acquire), self.destination.load(Ordering::Acquire))
    }

    fn set(&self, key: Key) {
        self.source.store(key.source, Ordering::Release);
        self.destination.store(key.destination, Ordering::Release);
    }
}

impl Leaf {
    /// Creates a leaf with `num_segments` empty, unindexed segments (each
    /// with fence key equal to `Key::MAX`, meaning "not yet indexed").
    #[must_use]
    pub fn new(num_segments: u32) -> std::sync::Arc<Self> {
        Self::with_capacity(num_segments, 256)
    }

    #[must_use]
    pub fn with_capacity(num_segments: u32, segment_capacity_qwords: u32) -> std::sync::Arc<Self> {
        let segments = (0..num_segments)
            .map(|_| Segment::new(segment_capacity_qwords, Key::MAX))
            .collect();

        std::sync::Arc::new(Self {
            segments,
            high_fence_key: AtomicHighFenceKey::new(Key::MAX),
            structural_latch: Mutex::new(()),
            next: std::sync::RwLock::new(None),
        })
    }

    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn segment(&self, segment_id: u16) -> Option<&Segment> {
        self.segments.get(segment_id as usize)
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn high_fence_key(&self) -> Key {
        self.high_fence_key.get()
    }

    pub fn set_high_fence_key(&self, key: Key) {
        self.high_fence_key.set(key);
    }

    #[must_use]
    pub fn next(&self) -> Option<std::sync::Arc<Leaf>> {
        self.next.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub fn set_next(&self, leaf: Option<std::sync::Arc<Leaf>>) {
        *self.next.write().unwrap_or_else(std::sync::PoisonError::into_inner) = leaf;
    }

    /// The high fence key of `segment_id`: either the low fence key of the
    /// next segment in this leaf, or the leaf's own high fence key for the
    /// last segment.
    #[must_use]
    pub fn segment_high_fence_key(&self, segment_id: u16) -> Key {
        self.segments
            .get(segment_id as usize + 1)
            .map(Segment::fence_key)
            .unwrap_or_else(|| self.high_fence_key())
    }

    /// Validates that `key` still falls within `segments[segment_id]`'s
    /// range. On failure, the caller must retry via the index (§4.4).
    #[must_use]
    pub fn check_fence_keys(&self, segment_id: u16, key: Key) -> bool {
        let Some(segment) = self.segment(segment_id) else {
            return false;
        };
        segment.fence_key() <= key && key < self.segment_high_fence_key(segment_id)
    }

    /// Acquires the leaf-wide structural latch. Held by the rebalancer for
    /// the duration of a split/merge affecting this leaf's segment array.
    #[must_use]
    pub fn lock_structural(&self) -> std::sync::MutexGuard<'_, ()> {
        self.structural_latch.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn fresh_leaf_segments_are_unindexed() {
        let leaf = Leaf::new(4);
        for segment in leaf.segments() {
            assert_eq!(segment.fence_key(), Key::MAX);
        }
    }

    #[test]
    fn check_fence_keys_respects_segment_boundaries() {
        let leaf = Leaf::new(2);
        leaf.segment(0).unwrap().set_fence_key(Key::MIN);
        leaf.segment(1).unwrap().set_fence_key(Key::vertex(10));
        leaf.set_high_fence_key(Key::MAX);

        assert!(leaf.check_fence_keys(0, Key::vertex(5)));
        assert!(!leaf.check_fence_keys(0, Key::vertex(10)));
        assert!(leaf.check_fence_keys(1, Key::vertex(10)));
    }
}
