// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The dense file: the representation a segment switches to when pruning
//! can't recover enough space, or concurrent writers thrash the sparse
//! layout. One slot per `(source, destination)`, same API as the sparse
//! file, no left/right growth regions.

use std::sync::Arc;

use super::{Scratchpad, Slots};
use crate::cursor::CursorState;
use crate::error::Result;
use crate::key::Key;
use crate::seqno::SeqNo;
use crate::value::Update;
use crate::version::{TransactionRef, UndoKind, VersionRecord};

pub struct DenseFile {
    slots: Slots,
}

impl DenseFile {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Slots::default() }
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

    /// Copies every live slot from a sparse file into a fresh dense file.
    /// Performed under the segment's writer latch (§4.2).
    #[must_use]
    pub fn from_sparse(sparse: &super::SparseFile) -> Self {
        let mut scratchpad = Scratchpad::new();
        sparse.load(&mut scratchpad);

        let mut dense = Self::new();
        for slot in scratchpad.slots() {
            dense.slots.push_raw(slot.key, slot.content, slot.undo.clone());
        }
        dense
    }
}

impl Default for DenseFile {
    fn default() -> Self {
        Self::new()
    }
}
