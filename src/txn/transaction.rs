// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Transactions: the public mutation/read API, backed by optimistic segment
//! access and a per-transaction undo log (§4.6, §6).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::aux::AuxView;
use crate::cursor::CursorState;
use crate::engine::Teseo;
use crate::error::{Error, LogicalError, Result, StepOutcome};
use crate::key::{external_to_internal, internal_to_external, Key};
use crate::leaf::Leaf;
use crate::rebalance;
use crate::segment::Segment;
use crate::txn::pool::Pool;
use crate::value::{EdgeRecord, Update, VertexRecord};
use crate::version::{TransactionRef, UndoKind};

/// A change to the engine-wide dynamic aux view, buffered until commit so a
/// rolled-back transaction never leaves a trace in it (§4.11).
enum DynamicOp {
    InsertVertex(u64),
    RemoveVertex(u64),
    ChangeDegree(u64, i64),
}

/// Shared, reference-counted state of a transaction: the part other threads
/// (readers checking visibility, the pool releasing a slot) need to see.
pub struct TransactionState {
    pub id: u64,
    pub read_ts: u64,
    pub commit_ts: Arc<AtomicU64>,
    pub read_only: bool,
    aborted: AtomicBool,
}

impl TransactionState {
    #[must_use]
    pub fn new(id: u64, read_ts: u64, read_only: bool) -> Self {
        Self {
            id,
            read_ts,
            commit_ts: Arc::new(AtomicU64::new(TransactionRef::UNCOMMITTED)),
            read_only,
            aborted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn as_transaction_ref(&self) -> TransactionRef {
        TransactionRef {
            transaction_id: self.id,
            commit_ts: Arc::clone(&self.commit_ts),
        }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// One entry of a transaction's undo log: enough to find the slot again and
/// ask it to unwind its own most recent write (§4.12).
struct UndoEntry {
    leaf: Arc<Leaf>,
    segment_id: u16,
    key: Key,
}

/// A single read-write or read-only unit of work against the engine.
///
/// Mutations are applied to the store immediately (not buffered) and are
/// visible only to this transaction until [`Transaction::commit`] assigns a
/// commit timestamp; [`Transaction::rollback`] unwinds them via the undo log.
pub struct Transaction {
    engine: Teseo,
    state: Arc<TransactionState>,
    numa_node: u64,
    pool: Arc<Pool>,
    pool_slot: Option<u32>,
    undo_log: Mutex<Vec<UndoEntry>>,
    pending_dynamic_ops: Mutex<Vec<DynamicOp>>,
    degree_query_count: AtomicU64,
    finished: AtomicBool,
}

impl Transaction {
    pub(crate) fn new(engine: Teseo, state: Arc<TransactionState>, numa_node: u64, pool: Arc<Pool>, pool_slot: Option<u32>) -> Self {
        Self {
            engine,
            state,
            numa_node,
            pool,
            pool_slot,
            undo_log: Mutex::new(Vec::new()),
            pending_dynamic_ops: Mutex::new(Vec::new()),
            degree_query_count: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }

    #[must_use]
    pub fn read_ts(&self) -> u64 {
        self.state.read_ts
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.read_only
    }

    #[must_use]
    pub fn numa_node(&self) -> u64 {
        self.numa_node
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.state.read_only {
            return Err(LogicalError::ReadOnlyTransaction.into());
        }
        Ok(())
    }

    fn own_reads(&self) -> Option<u64> {
        Some(self.state.id)
    }

    fn locate(&self, key: Key) -> Result<(Arc<Leaf>, u16)> {
        loop {
            let Some(entry) = self.engine.index.find(key) else {
                return Err(Error::Internal("index has no entry covering key".into()));
            };
            if entry.leaf.check_fence_keys(entry.segment_id, key) {
                return Ok((entry.leaf, entry.segment_id));
            }
        }
    }

    fn record_undo(&self, leaf: Arc<Leaf>, segment_id: u16, key: Key) {
        self.undo_log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(UndoEntry { leaf, segment_id, key });
    }

    fn record_dynamic_op(&self, op: DynamicOp) {
        self.pending_dynamic_ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(op);
    }

    /// The view backing this transaction's aux-side reads: the shared,
    /// continuously-updated counting tree for read-write transactions, or a
    /// snapshot consistent with `read_ts` for read-only ones (§4.10, §4.11).
    fn aux_view(&self) -> Arc<AuxView> {
        if self.state.read_only {
            self.engine.aux_view(self.aux_range_count(), self.state.read_ts)
        } else {
            Arc::new(AuxView::Dynamic(Arc::clone(&self.engine.dynamic_view)))
        }
    }

    /// Drives a single insert/remove through the optimistic retry loop:
    /// locate the owning segment, apply, and request a rebalance (executed
    /// inline, by this transaction's thread) if the segment filled up.
    fn mutate(&self, kind: UndoKind, update: Update, has_source_vertex: bool) -> Result<()> {
        self.ensure_writable()?;
        let key = update.key();

        loop {
            let (leaf, segment_id) = self.locate(key)?;
            let Some(segment) = leaf.segment(segment_id) else {
                continue;
            };

            let transaction = self.state.as_transaction_ref();
            let outcome = segment.update(kind, update, has_source_vertex, transaction, self.engine.config.memstore_segment_size)?;

            match outcome {
                StepOutcome::Done(()) => {
                    self.record_undo(Arc::clone(&leaf), segment_id, key);
                    return Ok(());
                }
                StepOutcome::NeedsRebalance => {
                    self.record_undo(Arc::clone(&leaf), segment_id, key);
                    match rebalance::acquire_window(&leaf, segment_id, self.engine.config.crawler_calibrator_tree_height) {
                        Ok(plan) => {
                            rebalance::execute(plan, &self.engine.index, self.engine.high_water_mark.get(), self.engine.config.memstore_segment_size)?;
                        }
                        Err(Error::RebalanceNotNecessary) => {}
                        Err(e) => return Err(e),
                    }
                    return Ok(());
                }
                StepOutcome::Retry => continue,
            }
        }
    }

    fn has_vertex_internal(&self, internal_id: u64) -> bool {
        let key = Key::vertex(internal_id);
        match self.engine.index.find(key) {
            Some(entry) => entry
                .leaf
                .segment(entry.segment_id)
                .is_some_and(|s| s.has_item_optimistic(key, self.state.read_ts, self.own_reads())),
            None => false,
        }
    }

    /// Inserts a new vertex. Errs with [`LogicalError::VertexAlreadyExists`]
    /// if it's already present.
    pub fn insert_vertex(&self, vertex_id: u64) -> Result<()> {
        let internal = external_to_internal(vertex_id);
        if self.has_vertex_internal(internal) {
            return Err(LogicalError::VertexAlreadyExists.into());
        }
        self.mutate(UndoKind::Insert, Update::Vertex(VertexRecord::new(internal)), true)?;
        self.record_dynamic_op(DynamicOp::InsertVertex(internal));
        Ok(())
    }

    /// Removes a vertex. Does not cascade to its edges (callers remove a
    /// vertex's edges explicitly, matching the one-op-at-a-time API shape).
    pub fn remove_vertex(&self, vertex_id: u64) -> Result<()> {
        let internal = external_to_internal(vertex_id);
        if !self.has_vertex_internal(internal) {
            return Err(LogicalError::VertexDoesNotExist.into());
        }
        self.mutate(UndoKind::Remove, Update::Vertex(VertexRecord::new(internal)), true)?;
        self.record_dynamic_op(DynamicOp::RemoveVertex(internal));
        Ok(())
    }

    #[must_use]
    pub fn has_vertex(&self, vertex_id: u64) -> bool {
        self.has_vertex_internal(external_to_internal(vertex_id))
    }

    #[must_use]
    pub fn has_edge(&self, source: u64, destination: u64) -> bool {
        let key = Key::edge(external_to_internal(source), external_to_internal(destination));
        match self.engine.index.find(key) {
            Some(entry) => entry
                .leaf
                .segment(entry.segment_id)
                .is_some_and(|s| s.has_item_optimistic(key, self.state.read_ts, self.own_reads())),
            None => false,
        }
    }

    /// Inserts the directed edge `source -> destination`. Errs if either
    /// endpoint doesn't exist, or the edge is already present.
    pub fn insert_edge(&self, source: u64, destination: u64, weight: f64) -> Result<()> {
        let src = external_to_internal(source);
        let dst = external_to_internal(destination);

        if !self.has_vertex_internal(src) || !self.has_vertex_internal(dst) {
            return Err(LogicalError::VertexDoesNotExist.into());
        }
        if self.has_edge(source, destination) {
            return Err(LogicalError::EdgeAlreadyExists.into());
        }

        let update = Update::Edge {
            source: src,
            edge: EdgeRecord::new(dst, weight),
        };
        self.mutate(UndoKind::Insert, update, true)?;
        self.record_dynamic_op(DynamicOp::ChangeDegree(src, 1));
        Ok(())
    }

    /// Removes the directed edge `source -> destination`.
    pub fn remove_edge(&self, source: u64, destination: u64) -> Result<()> {
        if !self.has_edge(source, destination) {
            return Err(LogicalError::EdgeDoesNotExist.into());
        }

        let src = external_to_internal(source);
        let dst = external_to_internal(destination);
        let update = Update::Edge {
            source: src,
            edge: EdgeRecord::new(dst, 0.0),
        };
        self.mutate(UndoKind::Remove, update, true)?;
        self.record_dynamic_op(DynamicOp::ChangeDegree(src, -1));
        Ok(())
    }

    /// Returns the weight of `source -> destination`, if present.
    pub fn get_weight(&self, source: u64, destination: u64) -> Result<f64> {
        let key = Key::edge(external_to_internal(source), external_to_internal(destination));
        let entry = self.engine.index.find(key).ok_or(LogicalError::EdgeDoesNotExist)?;
        let segment = entry.leaf.segment(entry.segment_id).ok_or(LogicalError::EdgeDoesNotExist)?;
        segment
            .get_weight_optimistic(key, self.state.read_ts, self.own_reads())
            .ok_or_else(|| LogicalError::EdgeDoesNotExist.into())
    }

    /// Walks every segment holding part of `internal`'s edge list, forward
    /// from its vertex record through however many dummy-vertex-continued
    /// segments follow, calling `on_segment` for each.
    fn walk_segments_for_source(&self, internal: u64, mut on_segment: impl FnMut(&Segment)) {
        let mut cursor = Key::vertex(internal);

        loop {
            let Some(entry) = self.engine.index.find(cursor) else { break };
            let Some(segment) = entry.leaf.segment(entry.segment_id) else {
                break;
            };

            on_segment(segment);

            let next_fence = entry.leaf.segment_high_fence_key(entry.segment_id);
            if next_fence.source != internal || next_fence <= cursor {
                break;
            }
            cursor = next_fence;
        }
    }

    /// Out-degree of a vertex. `logical == true` interprets `id` as a
    /// *logical* id (a rank in the aux view's sorted order, as returned by
    /// [`Transaction::logical_id`]) and answers from the aux view, which may
    /// lag behind this transaction's own uncommitted writes; `logical ==
    /// false` interprets `id` as a vertex id and walks the live segments.
    pub fn degree(&self, id: u64, logical: bool) -> Result<u64> {
        if logical {
            let view = self.aux_view();
            return view.degree_by_logical_id(id).ok_or_else(|| LogicalError::InvalidLogicalVertexId.into());
        }

        let internal = external_to_internal(id);
        if !self.has_vertex_internal(internal) {
            return Err(LogicalError::VertexDoesNotExist.into());
        }

        let prior_queries = self.degree_query_count.fetch_add(1, Ordering::AcqRel);
        if prior_queries >= u64::from(self.engine.config.aux_degree_threshold) {
            let view = self.aux_view();
            if let Some(degree) = view.degree_by_vertex_id(internal) {
                return Ok(degree);
            }
        }

        let mut total = 0u64;
        self.walk_segments_for_source(internal, |segment| {
            total += segment.get_degree(internal, self.state.read_ts, self.own_reads());
        });
        Ok(total)
    }

    /// Invokes `callback(destination, weight)` for each outgoing edge of
    /// `source`, stopping early if `callback` returns `false`.
    pub fn edges(&self, source: u64, mut callback: impl FnMut(u64, f64) -> bool) -> Result<()> {
        let internal = external_to_internal(source);
        if !self.has_vertex_internal(internal) {
            return Err(LogicalError::VertexDoesNotExist.into());
        }

        let mut cursor = CursorState::new();
        let mut stop = false;
        let read_ts = self.state.read_ts;
        let owner = self.own_reads();

        self.walk_segments_for_source(internal, |segment| {
            if stop {
                return;
            }
            segment.scan(Key::vertex(internal), read_ts, owner, &mut cursor, &mut |src, dst, weight| {
                if src != internal {
                    return false;
                }
                let keep_going = callback(internal_to_external(dst), weight);
                if !keep_going {
                    stop = true;
                }
                keep_going
            });
        });

        Ok(())
    }

    #[must_use]
    pub fn num_vertices(&self) -> u64 {
        self.aux_view().num_vertices()
    }

    #[must_use]
    pub fn num_edges(&self) -> u64 {
        self.aux_view().num_edges()
    }

    /// Maps a vertex id to its logical (rank) id in the current aux view.
    pub fn logical_id(&self, vertex_id: u64) -> Result<u64> {
        let internal = external_to_internal(vertex_id);
        self.aux_view().logical_id(internal).ok_or_else(|| LogicalError::VertexDoesNotExist.into())
    }

    /// Inverse of [`Transaction::logical_id`].
    pub fn vertex_id(&self, logical_id: u64) -> Result<u64> {
        self.aux_view()
            .vertex_id(logical_id)
            .map(internal_to_external)
            .ok_or_else(|| LogicalError::InvalidLogicalVertexId.into())
    }

    fn aux_range_count(&self) -> usize {
        self.engine.numa.num_nodes() as usize
    }

    /// Commits the transaction, assigning it a commit timestamp (read-only
    /// transactions skip this — they have nothing to publish).
    pub fn commit(self) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        if !self.state.read_only {
            let commit_ts = self.engine.commit_timestamp();
            self.state.commit_ts.store(commit_ts, Ordering::Release);
            self.apply_dynamic_ops();
        }
        self.engine.finish_transaction(self.state.id);
        self.release_pool_slot();
        Ok(())
    }

    /// Applies this transaction's buffered vertex/edge changes to the
    /// engine-wide dynamic aux view. Only called on commit: a rolled-back
    /// transaction's pending ops are simply dropped, so the dynamic view
    /// never observes writes that never happened (§4.11).
    fn apply_dynamic_ops(&self) {
        let mut pending = self.pending_dynamic_ops.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for op in pending.drain(..) {
            match op {
                DynamicOp::InsertVertex(vertex_id) => {
                    self.engine.dynamic_view.insert_vertex(vertex_id, None);
                }
                DynamicOp::RemoveVertex(vertex_id) => {
                    self.engine.dynamic_view.remove_vertex(vertex_id);
                }
                DynamicOp::ChangeDegree(vertex_id, diff) => {
                    self.engine.dynamic_view.change_degree(vertex_id, diff);
                }
            }
        }
    }

    /// Unwinds every write this transaction made, newest first, via each
    /// slot's undo chain.
    pub fn rollback(self) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        let mut undo_log = self.undo_log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while let Some(entry) = undo_log.pop() {
            if let Some(segment) = entry.leaf.segment(entry.segment_id) {
                segment.rollback_own(entry.key, self.state.id);
            }
        }
        drop(undo_log);

        self.engine.finish_transaction(self.state.id);
        self.release_pool_slot();
        Ok(())
    }

    fn release_pool_slot(&self) {
        if let Some(slot) = self.pool_slot {
            let _ = self.pool.release(slot);
        }
    }
}

impl Drop for Transaction {
    /// A transaction dropped without an explicit commit/rollback call rolls
    /// back, so a write slipping through a `?`-propagated error can't leave
    /// an orphaned undo log and a leaked pool slot.
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }

        let mut undo_log = self.undo_log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        while let Some(entry) = undo_log.pop() {
            if let Some(segment) = entry.leaf.segment(entry.segment_id) {
                segment.rollback_own(entry.key, self.state.id);
            }
        }
        drop(undo_log);

        self.engine.finish_transaction(self.state.id);
        self.release_pool_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use test_log::test;

    fn new_engine() -> Teseo {
        Teseo::new(Config::default())
    }

    #[test]
    fn insert_then_read_vertex_roundtrips() {
        let engine = new_engine();
        let ctx = engine.register_thread();
        let txn = engine.start_transaction(&ctx, false);

        assert!(!txn.has_vertex(10));
        txn.insert_vertex(10).unwrap();
        assert!(txn.has_vertex(10));
        assert!(matches!(txn.insert_vertex(10), Err(Error::Logical(LogicalError::VertexAlreadyExists))));

        txn.commit().unwrap();
    }

    #[test]
    fn insert_edge_requires_both_endpoints() {
        let engine = new_engine();
        let ctx = engine.register_thread();
        let txn = engine.start_transaction(&ctx, false);

        assert!(matches!(
            txn.insert_edge(1, 2, 1.0),
            Err(Error::Logical(LogicalError::VertexDoesNotExist))
        ));

        txn.insert_vertex(1).unwrap();
        txn.insert_vertex(2).unwrap();
        txn.insert_edge(1, 2, 2.5).unwrap();

        assert!(txn.has_edge(1, 2));
        assert_eq!(txn.get_weight(1, 2).unwrap(), 2.5);
        assert_eq!(txn.degree(1, false).unwrap(), 1);

        txn.commit().unwrap();
    }

    #[test]
    fn rollback_undoes_inserts() {
        let engine = new_engine();
        let ctx = engine.register_thread();
        let txn = engine.start_transaction(&ctx, false);

        txn.insert_vertex(5).unwrap();
        assert!(txn.has_vertex(5));
        txn.rollback().unwrap();

        let reader = engine.start_transaction(&ctx, true);
        assert!(!reader.has_vertex(5));
        reader.commit().unwrap();
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let engine = new_engine();
        let ctx = engine.register_thread();
        let txn = engine.start_transaction(&ctx, true);

        assert!(matches!(
            txn.insert_vertex(1),
            Err(Error::Logical(LogicalError::ReadOnlyTransaction))
        ));
    }

    #[test]
    fn edges_iterates_outgoing_edges() {
        let engine = new_engine();
        let ctx = engine.register_thread();
        let txn = engine.start_transaction(&ctx, false);

        txn.insert_vertex(1).unwrap();
        txn.insert_vertex(2).unwrap();
        txn.insert_vertex(3).unwrap();
        txn.insert_edge(1, 2, 1.0).unwrap();
        txn.insert_edge(1, 3, 2.0).unwrap();

        let mut seen = Vec::new();
        txn.edges(1, |dst, weight| {
            seen.push((dst, weight));
            true
        })
        .unwrap();
        seen.sort_by_key(|(dst, _)| *dst);
        assert_eq!(seen, vec![(2, 1.0), (3, 2.0)]);

        txn.commit().unwrap();
    }
}
