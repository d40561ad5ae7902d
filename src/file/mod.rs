// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Versioned element containers backing a segment: sparse and dense files.
//!
//! Both representations store an ordered sequence of vertex/edge records
//! keyed by [`crate::key::Key`], each slot carrying an undo chain. They
//! present an identical API (§4.2); only the transition between them, and
//! the qword-cost accounting that drives rebalance decisions, differs.

mod dense;
mod scratchpad;
mod slots;
mod sparse;

pub use dense::DenseFile;
pub use scratchpad::{Scratchpad, ScratchpadSlot};
pub use slots::Slots;
pub use sparse::SparseFile;

use crate::cursor::CursorState;
use crate::error::Result;
use crate::key::Key;
use crate::seqno::SeqNo;
use crate::value::Update;
use crate::version::{TransactionRef, UndoKind};

/// Either representation a segment's content may currently be in.
pub enum File {
    Sparse(SparseFile),
    Dense(DenseFile),
}

impl File {
    #[must_use]
    pub fn new_sparse(capacity_qwords: u32) -> Self {
        Self::Sparse(SparseFile::new(capacity_qwords))
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    #[must_use]
    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    #[must_use]
    pub fn used_space(&self) -> u32 {
        match self {
            Self::Sparse(f) => f.used_space(),
            Self::Dense(f) => f.used_space(),
        }
    }

    #[must_use]
    pub fn cardinality(&self) -> usize {
        match self {
            Self::Sparse(f) => f.slots().len(),
            Self::Dense(f) => f.slots().len(),
        }
    }

    /// Inserts or removes an element. `has_source_vertex` tells the file
    /// whether the caller already proved, via an earlier segment, that the
    /// edge's source vertex exists; when it's `false` and this file has no
    /// record of the source either, the update fails with
    /// [`crate::error::Error::NotSureIfVertexExists`].
    pub fn update(
        &mut self,
        kind: UndoKind,
        update: Update,
        has_source_vertex: bool,
        transaction: TransactionRef,
    ) -> Result<()> {
        match self {
            Self::Sparse(f) => f.update(kind, update, has_source_vertex, transaction),
            Self::Dense(f) => f.update(kind, update, has_source_vertex, transaction),
        }
    }

    pub fn rollback(&mut self, key: Key, next: Option<std::sync::Arc<crate::version::VersionRecord>>) {
        match self {
            Self::Sparse(f) => f.rollback(key, next),
            Self::Dense(f) => f.rollback(key, next),
        }
    }

    /// Undoes `key`'s most recent version iff it was written by `transaction_id`.
    pub fn rollback_own(&mut self, key: Key, transaction_id: u64) {
        match self {
            Self::Sparse(f) => f.rollback_own(key, transaction_id),
            Self::Dense(f) => f.rollback_own(key, transaction_id),
        }
    }

    #[must_use]
    pub fn has_item_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> bool {
        match self {
            Self::Sparse(f) => f.has_item_optimistic(key, read_ts, owner_txn),
            Self::Dense(f) => f.has_item_optimistic(key, read_ts, owner_txn),
        }
    }

    #[must_use]
    pub fn get_weight_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> Option<f64> {
        match self {
            Self::Sparse(f) => f.get_weight_optimistic(key, read_ts, owner_txn),
            Self::Dense(f) => f.get_weight_optimistic(key, read_ts, owner_txn),
        }
    }

    #[must_use]
    pub fn get_degree(&self, source: u64, read_ts: SeqNo, owner_txn: Option<u64>) -> u64 {
        match self {
            Self::Sparse(f) => f.get_degree(source, read_ts, owner_txn),
            Self::Dense(f) => f.get_degree(source, read_ts, owner_txn),
        }
    }

    pub fn scan(
        &self,
        from: Key,
        read_ts: SeqNo,
        owner_txn: Option<u64>,
        cursor: &mut CursorState,
        callback: &mut dyn FnMut(u64, u64, f64) -> bool,
    ) {
        match self {
            Self::Sparse(f) => f.scan(from, read_ts, owner_txn, cursor, callback),
            Self::Dense(f) => f.scan(from, read_ts, owner_txn, cursor, callback),
        }
    }

    pub fn aux_partial_result(
        &self,
        range: std::ops::Range<Key>,
        read_ts: SeqNo,
        partial: &mut crate::aux::partial_result::PartialResult,
    ) {
        match self {
            Self::Sparse(f) => f.aux_partial_result(range, read_ts, partial),
            Self::Dense(f) => f.aux_partial_result(range, read_ts, partial),
        }
    }

    /// Drops undo records whose writer's `commit_ts` predates the
    /// high-water mark, and drops insert-then-remove pairs entirely.
    pub fn prune(&mut self, high_water_mark: SeqNo) {
        match self {
            Self::Sparse(f) => f.prune(high_water_mark),
            Self::Dense(f) => f.prune(high_water_mark),
        }
    }

    /// Appends the live contents of this file, in key order, to `scratchpad`.
    pub fn load(&self, scratchpad: &mut Scratchpad) {
        match self {
            Self::Sparse(f) => f.load(scratchpad),
            Self::Dense(f) => f.load(scratchpad),
        }
    }
}
