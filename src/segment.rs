// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A segment: a latch, a fence key, and a sparse/dense file (§4.3).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::cursor::CursorState;
use crate::error::{Error, Result, StepOutcome};
use crate::file::{File, Scratchpad};
use crate::key::Key;
use crate::latch::SegmentLatch;
use crate::seqno::SeqNo;
use crate::value::Update;
use crate::version::{TransactionRef, UndoKind};

/// Fraction of capacity past which a writer requests a rebalance.
const REBALANCE_REQUEST_THRESHOLD: f64 = 0.75;

/// One segment of the sparse array: a latch, a fence key, and a file.
pub struct Segment {
    latch: SegmentLatch,
    fence_key: AtomicU64Key,
    file: Mutex<File>,
    rebal_requested: AtomicBool,
    last_rebalanced: Mutex<Instant>,
}

/// `Key` packed as two atomics; segments are updated under the writer latch
/// so plain loads/stores (not a CAS loop) suffice.
struct AtomicU64Key {
    source: AtomicU64,
    destination: AtomicU64,
}

impl AtomicU64Key {
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

impl Segment {
    #[must_use]
    pub fn new(capacity_qwords: u32, fence_key: Key) -> Self {
        Self {
            latch: SegmentLatch::new(),
            fence_key: AtomicU64Key::new(fence_key),
            file: Mutex::new(File::new_sparse(capacity_qwords)),
            rebal_requested: AtomicBool::new(false),
            last_rebalanced: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn latch(&self) -> &SegmentLatch {
        &self.latch
    }

    #[must_use]
    pub fn fence_key(&self) -> Key {
        self.fence_key.get()
    }

    pub fn set_fence_key(&self, key: Key) {
        self.fence_key.set(key);
    }

    #[must_use]
    pub fn is_unindexed(&self, high_fence_key: Key) -> bool {
        self.fence_key() == high_fence_key
    }

    #[must_use]
    pub fn has_requested_rebalance(&self) -> bool {
        self.rebal_requested.load(Ordering::Acquire)
    }

    pub fn cancel_rebalance_request(&self) {
        self.rebal_requested.store(false, Ordering::Release);
    }

    pub fn mark_rebalanced(&self) {
        self.rebal_requested.store(false, Ordering::Release);
        *self.last_rebalanced.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_sparse()
    }

    #[must_use]
    pub fn used_space(&self) -> u32 {
        self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner).used_space()
    }

    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner).cardinality()
    }

    /// Applies `update` under the writer latch. Requests a rebalance (and
    /// reports it via `StepOutcome::NeedsRebalance`) once the segment fills
    /// past [`REBALANCE_REQUEST_THRESHOLD`].
    pub fn update(
        &self,
        kind: UndoKind,
        update: Update,
        has_source_vertex: bool,
        transaction: TransactionRef,
        capacity_qwords: u32,
    ) -> Result<StepOutcome<()>> {
        self.latch.writer_enter();
        let result = {
            let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            file.update(kind, update, has_source_vertex, transaction)
        };
        self.latch.writer_exit();

        result?;

        if self.used_space() as f64 >= REBALANCE_REQUEST_THRESHOLD * f64::from(capacity_qwords) {
            self.request_rebalance();
            return Ok(StepOutcome::NeedsRebalance);
        }

        Ok(StepOutcome::Done(()))
    }

    fn request_rebalance(&self) {
        self.rebal_requested.store(true, Ordering::Release);
    }

    pub fn rollback(&self, key: Key, next: Option<Arc<crate::version::VersionRecord>>) {
        self.latch.writer_enter();
        {
            let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            file.rollback(key, next);
        }
        self.latch.writer_exit();
    }

    /// Undoes `key`'s most recent version iff it was written by `transaction_id`.
    pub fn rollback_own(&self, key: Key, transaction_id: u64) {
        self.latch.writer_enter();
        {
            let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            file.rollback_own(key, transaction_id);
        }
        self.latch.writer_exit();
    }

    #[must_use]
    pub fn has_item_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> bool {
        let file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.has_item_optimistic(key, read_ts, owner_txn)
    }

    #[must_use]
    pub fn get_weight_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> Option<f64> {
        let file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.get_weight_optimistic(key, read_ts, owner_txn)
    }

    #[must_use]
    pub fn get_degree(&self, source: u64, read_ts: SeqNo, owner_txn: Option<u64>) -> u64 {
        let file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.get_degree(source, read_ts, owner_txn)
    }

    pub fn scan(
        &self,
        from: Key,
        read_ts: SeqNo,
        owner_txn: Option<u64>,
        cursor: &mut CursorState,
        callback: &mut dyn FnMut(u64, u64, f64) -> bool,
    ) {
        let file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.scan(from, read_ts, owner_txn, cursor, callback);
    }

    pub fn aux_partial_result(
        &self,
        range: std::ops::Range<Key>,
        read_ts: SeqNo,
        partial: &mut crate::aux::partial_result::PartialResult,
    ) {
        let file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.aux_partial_result(range, read_ts, partial);
    }

    /// Rebalancer-only: compacts undo chains against the high-water mark.
    pub fn prune(&self, high_water_mark: SeqNo) {
        self.latch.rebalancer_enter();
        {
            let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            file.prune(high_water_mark);
        }
        self.latch.rebalancer_exit();
    }

    /// Rebalancer-only: appends this segment's live contents to `scratchpad`.
    pub fn load(&self, scratchpad: &mut Scratchpad) {
        let file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        file.load(scratchpad);
    }

    /// Rebalancer-only: replaces this segment's content wholesale.
    pub fn replace_with(&self, file: File) {
        let mut slot = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = file;
    }

    /// Rebalancer-only: converts this segment to a dense file if it's
    /// currently sparse; no-op otherwise.
    pub fn to_dense_file(&self) {
        let mut slot = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let File::Sparse(sparse) = &*slot {
            *slot = File::Dense(crate::file::DenseFile::from_sparse(sparse));
        }
    }

    /// Rebalancer-only: resets the segment to an empty sparse file of the
    /// given capacity.
    pub fn to_sparse_file(&self, capacity_qwords: u32) {
        let mut slot = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !slot.is_sparse() {
            *slot = File::new_sparse(capacity_qwords);
        }
    }

    #[must_use]
    pub fn needs_async_rebalance(&self, min_interval: std::time::Duration) -> bool {
        self.has_requested_rebalance()
            && self
                .last_rebalanced
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .elapsed()
                >= min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VertexRecord;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use test_log::test;

    fn committed(id: u64, ts: u64) -> TransactionRef {
        TransactionRef {
            transaction_id: id,
            commit_ts: Arc::new(StdAtomicU64::new(ts)),
        }
    }

    #[test]
    fn update_past_threshold_requests_rebalance() {
        let segment = Segment::new(4, Key::MIN);
        // 4 qwords capacity, vertex costs 3: one insert already crosses 0.75*4=3
        let outcome = segment
            .update(UndoKind::Insert, Update::Vertex(VertexRecord::new(1)), true, committed(1, 1), 4)
            .unwrap();
        assert!(matches!(outcome, StepOutcome::NeedsRebalance));
        assert!(segment.has_requested_rebalance());
    }

    #[test]
    fn fence_key_roundtrips() {
        let segment = Segment::new(64, Key::vertex(5));
        assert_eq!(segment.fence_key(), Key::vertex(5));
        segment.set_fence_key(Key::vertex(9));
        assert_eq!(segment.fence_key(), Key::vertex(9));
    }
}
