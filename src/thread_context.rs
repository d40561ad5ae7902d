// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A thread context: what `register_thread` binds an OS thread to (§5, §6).
//!
//! Rather than a thread-local keyed by engine instance, registration
//! returns an explicit handle the caller threads through its calls to
//! [`crate::engine::Teseo`] — easier to reason about and to exercise in
//! tests than implicit thread-local state.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::txn::pool::Pool;

/// A short-lived cache of this thread's own active-transaction ids, used to
/// avoid contending on the engine-wide transaction list on every read.
struct CachedTxnList {
    ids: Vec<u64>,
    refreshed_at: Instant,
}

/// Per-thread state bound by [`crate::engine::Teseo::register_thread`].
pub struct ThreadContext {
    numa_node: u64,
    pool: Arc<Pool>,
    txn_list_cache: RwLock<CachedTxnList>,
    txn_list_lifetime: Duration,
}

impl ThreadContext {
    #[must_use]
    pub(crate) fn new(numa_node: u64, pool: Arc<Pool>, txn_list_lifetime: Duration) -> Self {
        Self {
            numa_node,
            pool,
            txn_list_cache: RwLock::new(CachedTxnList {
                ids: Vec::new(),
                refreshed_at: Instant::now() - txn_list_lifetime,
            }),
            txn_list_lifetime,
        }
    }

    #[must_use]
    pub fn numa_node(&self) -> u64 {
        self.numa_node
    }

    pub(crate) fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub(crate) fn into_pool(self) -> Arc<Pool> {
        self.pool
    }

    /// Returns the cached active-transaction list if it's still within its
    /// lifetime, or `None` to signal the caller should refresh it.
    #[must_use]
    pub(crate) fn cached_txn_list(&self) -> Option<Vec<u64>> {
        let cache = self.txn_list_cache.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if cache.refreshed_at.elapsed() < self.txn_list_lifetime {
            Some(cache.ids.clone())
        } else {
            None
        }
    }

    pub(crate) fn refresh_txn_list(&self, ids: Vec<u64>) {
        let mut cache = self.txn_list_cache.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.ids = ids;
        cache.refreshed_at = Instant::now();
    }
}
