// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The engine: wires the fat tree, vertex table, merger, and transaction
//! bookkeeping together (§5, §6).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::aux::{AuxView, AuxViewCache, CountingTree};
use crate::config::Config;
use crate::index::{FatTreeIndex, IndexEntry};
use crate::key::Key;
use crate::leaf::Leaf;
use crate::merger::Merger;
use crate::numa::NumaTopology;
use crate::seqno::{HighWaterMark, SequenceNumberCounter};
use crate::thread_context::ThreadContext;
use crate::txn::pool::PoolRegistry;
use crate::txn::transaction::{Transaction, TransactionState};
use crate::vertex_table::VertexTable;

/// A handle to the Teseo storage engine.
///
/// Cheap to clone: internally an [`Arc`] around [`TeseoInner`], following the
/// same handle-around-shared-state shape as other engine entry points in
/// this codebase.
#[derive(Clone)]
pub struct Teseo(pub(crate) Arc<TeseoInner>);

impl std::ops::Deref for Teseo {
    type Target = TeseoInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct TeseoInner {
    pub(crate) config: Config,
    pub(crate) index: Arc<FatTreeIndex>,
    pub(crate) vertex_table: Arc<VertexTable>,
    pub(crate) numa: NumaTopology,
    pub(crate) pool_registry: PoolRegistry,
    pub(crate) merger: Merger,
    pub(crate) txn_id_counter: SequenceNumberCounter,
    pub(crate) commit_ts_counter: SequenceNumberCounter,
    pub(crate) high_water_mark: HighWaterMark,
    pub(crate) aux_cache: AuxViewCache,
    /// The single counting tree backing every read-write transaction's
    /// [`AuxView::Dynamic`]. Unlike `aux_cache`'s static snapshots, this
    /// structure is mutated in place as transactions commit, so read-write
    /// transactions see their own (and concurrent) writes without waiting
    /// for a full keyspace rescan (§4.11).
    pub(crate) dynamic_view: Arc<CountingTree>,
    /// Maps every currently active transaction id to its read timestamp, so
    /// the high-water mark can be recomputed as transactions come and go.
    active_transactions: Mutex<BTreeMap<u64, u64>>,
    /// The most recently assigned commit timestamp, or `0` if nothing has
    /// committed yet. `0` is an unambiguous "nothing committed" sentinel
    /// because `commit_ts_counter` reserves `0` and hands out real commit
    /// timestamps starting at `1` (see [`Teseo::new`]).
    last_committed_ts: AtomicU64,
}

impl Teseo {
    /// Opens a new engine with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let index = Arc::new(FatTreeIndex::new());

        let whole_keyspace = Leaf::with_capacity(config.memstore_num_segments_per_leaf, config.memstore_segment_size);
        whole_keyspace.segment(0).expect("leaf always has at least one segment").set_fence_key(Key::MIN);
        whole_keyspace.set_high_fence_key(Key::MAX);
        index.insert(Key::MIN, IndexEntry::new(Arc::clone(&whole_keyspace), 0));

        let vertex_table = Arc::new(VertexTable::new(&config));
        let high_water_mark = HighWaterMark::new(0);
        let merger = Merger::new(Arc::clone(&index), Arc::clone(&vertex_table), high_water_mark.clone());
        merger.start();

        let inner = TeseoInner {
            numa: NumaTopology::from_config(&config),
            pool_registry: PoolRegistry::new(),
            merger,
            txn_id_counter: SequenceNumberCounter::default(),
            // Commit timestamp 0 is reserved (never assigned to a commit) so
            // that `last_committed_ts == 0` unambiguously means "nothing has
            // committed yet" rather than colliding with a real commit at 0.
            commit_ts_counter: SequenceNumberCounter::new(1),
            high_water_mark,
            aux_cache: AuxViewCache::new(),
            dynamic_view: Arc::new(CountingTree::with_capacity(
                config.aux_counting_tree_capacity_leaves as usize,
                config.aux_counting_tree_capacity_inodes as usize,
            )),
            active_transactions: Mutex::new(BTreeMap::new()),
            last_committed_ts: AtomicU64::new(0),
            config,
            index,
            vertex_table,
        };

        debug!("teseo engine opened");
        Self(Arc::new(inner))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the calling thread to the engine: assigns it a NUMA node and a
    /// transaction memory pool. The returned handle is threaded through
    /// every subsequent call this thread makes into the engine.
    #[must_use]
    pub fn register_thread(&self) -> Arc<ThreadContext> {
        let numa_node = self.numa.assign();
        let pool = self.pool_registry.checkout(&self.config);
        Arc::new(ThreadContext::new(numa_node, pool, self.config.tctimer_txnlist_lifetime))
    }

    /// Releases a thread context, returning its pool to the registry if it's
    /// sufficiently idle.
    pub fn unregister_thread(&self, ctx: Arc<ThreadContext>) {
        if let Ok(ctx) = Arc::try_unwrap(ctx) {
            self.pool_registry.checkin(ctx.into_pool());
        }
    }

    /// Starts a new transaction bound to `ctx`.
    ///
    /// `read_ts` is pinned to the most recently *assigned* commit timestamp,
    /// not the next one to be handed out: a concurrently racing writer that
    /// has not yet finished `commit()` will be assigned a strictly greater
    /// timestamp than this, so it can never become visible to a transaction
    /// that already started (spec.md §8, MVCC isolation).
    #[must_use]
    pub fn start_transaction(&self, ctx: &ThreadContext, read_only: bool) -> Transaction {
        let id = self.txn_id_counter.next();
        let read_ts = self.last_committed_ts.load(Ordering::Acquire);

        self.active_transactions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, read_ts);

        let state = Arc::new(TransactionState::new(id, read_ts, read_only));
        let pool = Arc::clone(ctx.pool());
        let pool_slot = pool.acquire(Arc::clone(&state));

        Transaction::new(self.clone(), state, ctx.numa_node(), pool, pool_slot)
    }

    /// Called by a transaction when it commits or rolls back: removes it
    /// from the active set and recomputes the high-water mark.
    pub(crate) fn finish_transaction(&self, txn_id: u64) {
        let mut active = self.active_transactions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        active.remove(&txn_id);

        let floor = active.values().copied().min().unwrap_or_else(|| self.commit_ts_counter.get());
        self.high_water_mark.set(floor);
    }

    /// Allocates the next commit timestamp and records the committing
    /// transaction as the most recent one, invalidating the aux-view cache.
    pub(crate) fn commit_timestamp(&self) -> u64 {
        let ts = self.commit_ts_counter.next();
        self.last_committed_ts.store(ts, Ordering::Release);
        self.aux_cache.invalidate();
        ts
    }

    /// Returns a view consistent with `read_ts`: the shared cache if it was
    /// built for a commit at or before `read_ts`, else a freshly built one
    /// (§4.10). A transaction must always pass its own `read_ts` here —
    /// never "the latest commit" — so that a long-running read-only
    /// transaction never observes a write committed after it started.
    #[must_use]
    pub(crate) fn aux_view(&self, num_ranges: usize, read_ts: u64) -> Arc<AuxView> {
        let generation = self.last_committed_ts.load(Ordering::Acquire);
        if generation <= read_ts {
            if let Some(view) = self.aux_cache.get(generation) {
                return view;
            }
        }

        let view = Arc::new(crate::aux::scan_and_build(&self.index, read_ts, num_ranges, &self.config));
        if generation <= read_ts {
            self.aux_cache.set(generation, Arc::clone(&view));
        }
        view
    }
}

impl Drop for TeseoInner {
    fn drop(&mut self) {
        self.merger.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn new_engine_indexes_the_whole_keyspace() {
        let engine = Teseo::new(Config::default());
        assert!(engine.index.find(Key::MIN).is_some());
        assert!(engine.index.find(Key::vertex(12345)).is_some());
    }

    #[test]
    fn register_thread_assigns_a_numa_node_and_a_pool() {
        let engine = Teseo::new(Config::default());
        let ctx = engine.register_thread();
        assert_eq!(ctx.numa_node(), 0);
        engine.unregister_thread(ctx);
    }

    #[test]
    fn start_transaction_hands_out_increasing_ids() {
        let engine = Teseo::new(Config::default());
        let ctx = engine.register_thread();
        let t1 = engine.start_transaction(&ctx, false);
        let t2 = engine.start_transaction(&ctx, false);
        assert!(t2.id() > t1.id());
    }
}
