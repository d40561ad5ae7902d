// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Engine configuration, a chainable builder in the style of `lsm-tree::Config`.
//!
//! Defaults are taken from the original `teseo` research system's
//! `StaticConfiguration` (see SPEC_FULL.md §B), which fixed these at compile
//! time; we expose them as runtime-tunable fields instead, since nothing in
//! this crate's design requires them to be `const`.

use std::time::Duration;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of segments per leaf. Must be a power of two.
    pub memstore_num_segments_per_leaf: u32,

    /// Size of a segment's sparse/dense file, in qwords (8-byte words).
    pub memstore_segment_size: u32,

    /// Capacity of a transaction memory pool, in number of transactions.
    pub transaction_memory_pool_size: u32,

    /// Size, in bytes, of a transaction's (non-embedded) undo buffer.
    pub transaction_undo_buffer_size: u32,

    /// Size, in bytes, of the small undo buffer embedded in every transaction.
    pub transaction_undo_embedded_size: u32,

    /// Number of direct-storage degree reads before the runtime switches a
    /// transaction over to an aux-view-backed degree query.
    pub aux_degree_threshold: u32,

    /// Counting-tree internal node fanout.
    pub aux_counting_tree_capacity_inodes: u32,

    /// Counting-tree leaf fanout.
    pub aux_counting_tree_capacity_leaves: u32,

    /// Minimum vertex table capacity (slots).
    pub vertex_table_min_capacity: u64,

    /// Load factor past which the vertex table resizes.
    pub vertex_table_max_fill_factor: f64,

    /// Number of NUMA nodes to replicate engine-wide structures across.
    pub numa_num_nodes: u32,

    /// Whether to actually vary behavior per NUMA node (vs. a single replica).
    pub numa_enabled: bool,

    /// Height of the crawler's calibrator tree; `0` means `log2(num_segments)`.
    pub crawler_calibrator_tree_height: u32,

    /// How long a thread context's cached active-transaction list stays valid.
    pub tctimer_txnlist_lifetime: Duration,

    /// Fill factor below which an idle transaction memory pool is returned
    /// to the global free list for reuse by another thread.
    pub transaction_memory_pool_reuse_fill_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memstore_num_segments_per_leaf: 512,
            memstore_segment_size: 256,
            transaction_memory_pool_size: 1024,
            transaction_undo_buffer_size: 4096,
            transaction_undo_embedded_size: 64,
            aux_degree_threshold: 8,
            aux_counting_tree_capacity_inodes: 64,
            aux_counting_tree_capacity_leaves: 64,
            vertex_table_min_capacity: 1024,
            vertex_table_max_fill_factor: 0.6,
            numa_num_nodes: 1,
            numa_enabled: false,
            crawler_calibrator_tree_height: 0,
            tctimer_txnlist_lifetime: Duration::from_millis(60),
            transaction_memory_pool_reuse_fill_factor: 0.25,
        }
    }
}

impl Config {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of segments per leaf.
    ///
    /// # Panics
    ///
    /// Panics if `n` is not a power of two, or is zero.
    #[must_use]
    pub fn memstore_num_segments_per_leaf(mut self, n: u32) -> Self {
        assert!(n > 0 && n.is_power_of_two(), "must be a nonzero power of two");
        self.memstore_num_segments_per_leaf = n;
        self
    }

    /// Sets the per-segment file size, in qwords.
    ///
    /// # Panics
    ///
    /// Panics if `qwords` is zero.
    #[must_use]
    pub fn memstore_segment_size(mut self, qwords: u32) -> Self {
        assert!(qwords > 0, "segment size must be nonzero");
        self.memstore_segment_size = qwords;
        self
    }

    /// Sets the transaction memory pool capacity.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds `u16::MAX` (free slots are tracked as `u16`).
    #[must_use]
    pub fn transaction_memory_pool_size(mut self, n: u32) -> Self {
        assert!(n <= u32::from(u16::MAX), "pool size must fit in a u16");
        self.transaction_memory_pool_size = n;
        self
    }

    /// Sets the threshold of direct degree reads before switching to an aux view.
    #[must_use]
    pub fn aux_degree_threshold(mut self, n: u32) -> Self {
        self.aux_degree_threshold = n;
        self
    }

    /// Sets the counting tree's internal-node fanout.
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2.
    #[must_use]
    pub fn aux_counting_tree_capacity_inodes(mut self, n: u32) -> Self {
        assert!(n >= 2, "internal node capacity must be at least 2");
        self.aux_counting_tree_capacity_inodes = n;
        self
    }

    /// Sets the counting tree's leaf fanout.
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2.
    #[must_use]
    pub fn aux_counting_tree_capacity_leaves(mut self, n: u32) -> Self {
        assert!(n >= 2, "leaf capacity must be at least 2");
        self.aux_counting_tree_capacity_leaves = n;
        self
    }

    /// Sets the crawler's calibrator tree height; `0` means `log2(num_segments)`.
    #[must_use]
    pub fn crawler_calibrator_tree_height(mut self, height: u32) -> Self {
        self.crawler_calibrator_tree_height = height;
        self
    }

    /// Sets the vertex table's maximum load factor before resizing.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is not in `(0, 1]`.
    #[must_use]
    pub fn vertex_table_max_fill_factor(mut self, factor: f64) -> Self {
        assert!(factor > 0.0 && factor <= 1.0, "fill factor must be in (0, 1]");
        self.vertex_table_max_fill_factor = factor;
        self
    }

    /// Sets the number of NUMA nodes to replicate across.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    #[must_use]
    pub fn numa_num_nodes(mut self, n: u32) -> Self {
        assert!(n > 0, "must have at least one numa node");
        self.numa_num_nodes = n;
        self.numa_enabled = n > 1;
        self
    }

    /// Opens a new engine using this config.
    #[must_use]
    pub fn open(self) -> crate::engine::Teseo {
        crate::engine::Teseo::new(self)
    }
}
