// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The sparse file: the default, compact representation of a segment's
//! live content plus undo chains.

use std::sync::Arc;

use super::{Scratchpad, Slots};
use crate::cursor::CursorState;
use crate::error::Result;
use crate::key::Key;
use crate::seqno::SeqNo;
use crate::value::Update;
use crate::version::{TransactionRef, UndoKind, VersionRecord};

/// A sparse file: `capacity_qwords` machine words, growing from both ends in
/// the original design (SPEC_FULL.md §B). The split into `LHS`/`RHS` regions
/// only matters for in-place compaction of a fixed byte buffer; expressed as
/// a single ordered [`Slots`] run, both regions collapse into one sorted
/// sequence with identical observable behaviour.
pub struct SparseFile {
    capacity_qwords: u32,
    slots: Slots,
}

impl SparseFile {
    #[must_use]
    pub fn new(capacity_qwords: u32) -> Self {
        Self {
            capacity_qwords,
            slots: Slots::default(),
        }
    }

    #[must_use]
    pub fn capacity_qwords(&self) -> u32 {
        self.capacity_qwords
    }

    #[must_use]
    pub fn used_space(&self) -> u32 {
        self.slots.used_qwords()
    }

    #[must_use]
    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    pub fn update(
        &mut self,
        kind: UndoKind,
        update: Update,
        has_source_vertex: bool,
        transaction: TransactionRef,
    ) -> Result<()> {
        self.slots.update(kind, update, has_source_vertex, transaction)
    }

    pub fn rollback(&mut self, key: Key, next: Option<Arc<VersionRecord>>) {
        self.slots.rollback(key, next);
    }

    pub fn rollback_own(&mut self, key: Key, transaction_id: u64) {
        self.slots.rollback_own(key, transaction_id);
    }

    #[must_use]
    pub fn has_item_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> bool {
        self.slots.has_item_optimistic(key, read_ts, owner_txn)
    }

    #[must_use]
    pub fn get_weight_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> Option<f64> {
        self.slots.get_weight_optimistic(key, read_ts, owner_txn)
    }

    #[must_use]
    pub fn get_degree(&self, source: u64, read_ts: SeqNo, owner_txn: Option<u64>) -> u64 {
        self.slots.get_degree(source, read_ts, owner_txn)
    }

    pub fn scan(
        &self,
        from: Key,
        read_ts: SeqNo,
        owner_txn: Option<u64>,
        cursor: &mut CursorState,
        callback: &mut dyn FnMut(u64, u64, f64) -> bool,
    ) {
        self.slots.scan(from, read_ts, owner_txn, cursor, callback);
    }

    pub fn aux_partial_result(
        &self,
        range: std::ops::Range<Key>,
        read_ts: SeqNo,
        partial: &mut crate::aux::partial_result::PartialResult,
    ) {
        self.slots.aux_partial_result(range, read_ts, partial);
    }

    pub fn prune(&mut self, high_water_mark: SeqNo) {
        self.slots.prune(high_water_mark);
    }

    pub fn load(&self, scratchpad: &mut Scratchpad) {
        for slot in self.slots.iter() {
            scratchpad.push(slot.key, slot.content, slot.undo.clone());
        }
    }

    /// Rebuilds a sparse file wholesale from a save phase's chunk of
    /// scratchpad slots, preserving each slot's undo chain.
    #[must_use]
    pub fn from_scratchpad(chunk: &[super::ScratchpadSlot], capacity_qwords: u32) -> Self {
        let mut file = Self::new(capacity_qwords);
        for slot in chunk {
            file.slots.push_raw(slot.key, slot.content, slot.undo.clone());
        }
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{EdgeRecord, VertexRecord};
    use crate::version::TransactionRef;
    use std::sync::atomic::AtomicU64;
    use test_log::test;

    fn committed(id: u64, ts: u64) -> TransactionRef {
        TransactionRef {
            transaction_id: id,
            commit_ts: Arc::new(AtomicU64::new(ts)),
        }
    }

    #[test]
    fn insert_vertex_then_edge_is_visible_and_counted() {
        let mut file = SparseFile::new(256);
        file.update(UndoKind::Insert, Update::Vertex(VertexRecord::new(10)), true, committed(1, 1))
            .unwrap();
        file.update(
            UndoKind::Insert,
            Update::Edge {
                source: 10,
                edge: EdgeRecord::new(20, 1.5),
            },
            true,
            committed(2, 2),
        )
        .unwrap();

        assert!(file.has_item_optimistic(Key::vertex(10), 10, None));
        assert_eq!(file.get_degree(10, 10, None), 1);
        assert_eq!(file.get_weight_optimistic(Key::edge(10, 20), 10, None), Some(1.5));
    }

    #[test]
    fn edge_without_known_source_fails() {
        let mut file = SparseFile::new(256);
        let err = file
            .update(
                UndoKind::Insert,
                Update::Edge {
                    source: 99,
                    edge: EdgeRecord::new(20, 1.0),
                },
                false,
                committed(1, 1),
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::NotSureIfVertexExists));
    }

    #[test]
    fn prune_drops_versions_older_than_high_water_mark() {
        let mut file = SparseFile::new(256);
        file.update(UndoKind::Insert, Update::Vertex(VertexRecord::new(1)), true, committed(1, 5))
            .unwrap();
        file.prune(10);
        assert!(file.slots().iter().next().unwrap().undo.is_none());
    }
}
