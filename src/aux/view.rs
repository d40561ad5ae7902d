// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Read adapters over a snapshot of the graph: a static, array-backed view
//! for read-only transactions, and a dynamic, counting-tree-backed view for
//! read-write transactions (§4.10, §9 "virtual inheritance" redesign note).

use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::FxHasher;

use super::builder::DegreeEntry;
use super::counting_tree::CountingTree;
use crate::config::Config;

fn hash_u64(value: u64) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(value);
    hasher.finish()
}

/// `vertex_id -> logical_id` lookup backing a [`AuxView::Static`].
pub enum HashBackedLookup {
    /// `table[vertex_id] = Some(logical_id)`; used when vertex IDs are dense.
    Direct(Vec<Option<u64>>),
    /// Open-addressing hash over a power-of-two capacity.
    Hashed { mask: u64, slots: Vec<Option<(u64, u64)>> },
}

impl HashBackedLookup {
    #[must_use]
    pub fn direct(degree_vector: &[DegreeEntry], max_vertex_id: u64) -> Self {
        let mut table = vec![None; max_vertex_id as usize + 1];
        for (logical_id, entry) in degree_vector.iter().enumerate() {
            table[entry.vertex_id as usize] = Some(logical_id as u64);
        }
        Self::Direct(table)
    }

    #[must_use]
    pub fn hashed(degree_vector: &[DegreeEntry], _config: &Config) -> Self {
        let capacity = (degree_vector.len().max(1) * 2).next_power_of_two();
        let mask = capacity as u64 - 1;
        let mut slots = vec![None; capacity];

        for (logical_id, entry) in degree_vector.iter().enumerate() {
            let mut slot = (hash_u64(entry.vertex_id) & mask) as usize;
            while slots[slot].is_some() {
                slot = (slot + 1) % capacity;
            }
            slots[slot] = Some((entry.vertex_id, logical_id as u64));
        }

        Self::Hashed { mask, slots }
    }

    #[must_use]
    pub fn logical_id(&self, vertex_id: u64) -> Option<u64> {
        match self {
            Self::Direct(table) => table.get(vertex_id as usize).copied().flatten(),
            Self::Hashed { mask, slots } => {
                let mut slot = (hash_u64(vertex_id) & mask) as usize;
                for _ in 0..slots.len() {
                    match slots[slot] {
                        Some((id, logical_id)) if id == vertex_id => return Some(logical_id),
                        None => return None,
                        Some(_) => slot = (slot + 1) % slots.len(),
                    }
                }
                None
            }
        }
    }
}

/// A consistent snapshot of `logical_id <-> vertex_id <-> degree`.
pub enum AuxView {
    /// Built once for a read-only transaction; immutable for its lifetime.
    Static {
        degree_vector: Vec<DegreeEntry>,
        lookup: HashBackedLookup,
    },
    /// Backs read-write transactions: one counting tree shared by the whole
    /// engine, kept current as every committing transaction applies its
    /// vertex/edge changes to it (see `Teseo::dynamic_view`).
    Dynamic(Arc<CountingTree>),
}

impl AuxView {
    #[must_use]
    pub fn num_vertices(&self) -> u64 {
        match self {
            Self::Static { degree_vector, .. } => degree_vector.len() as u64,
            Self::Dynamic(tree) => tree.len() as u64,
        }
    }

    /// Sum of every vertex's out-degree, i.e. the total edge count.
    #[must_use]
    pub fn num_edges(&self) -> u64 {
        match self {
            Self::Static { degree_vector, .. } => degree_vector.iter().map(|e| e.degree).sum(),
            Self::Dynamic(tree) => tree.total_degree(),
        }
    }

    #[must_use]
    pub fn logical_id(&self, vertex_id: u64) -> Option<u64> {
        match self {
            Self::Static { lookup, .. } => lookup.logical_id(vertex_id),
            Self::Dynamic(tree) => tree.rank_of(vertex_id),
        }
    }

    #[must_use]
    pub fn vertex_id(&self, logical_id: u64) -> Option<u64> {
        match self {
            Self::Static { degree_vector, .. } => {
                degree_vector.get(logical_id as usize).map(|e| e.vertex_id)
            }
            Self::Dynamic(tree) => tree.get_by_rank(logical_id).map(|item| item.vertex_id),
        }
    }

    #[must_use]
    pub fn degree_by_vertex_id(&self, vertex_id: u64) -> Option<u64> {
        match self {
            Self::Static { degree_vector, lookup } => {
                let logical_id = lookup.logical_id(vertex_id)?;
                degree_vector.get(logical_id as usize).map(|e| e.degree)
            }
            Self::Dynamic(tree) => tree.get_by_vertex_id(vertex_id).map(|(item, _rank)| item.degree),
        }
    }

    #[must_use]
    pub fn degree_by_logical_id(&self, logical_id: u64) -> Option<u64> {
        match self {
            Self::Static { degree_vector, .. } => degree_vector.get(logical_id as usize).map(|e| e.degree),
            Self::Dynamic(tree) => tree.get_by_rank(logical_id).map(|item| item.degree),
        }
    }
}
