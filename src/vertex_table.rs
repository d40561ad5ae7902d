// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The vertex table: a NUMA-replicated, open-addressing cache from
//! `vertex_id` to an advisory direct pointer into the fat tree (§4.6).
//!
//! Per §9's redesign note, entries are a plain tagged struct rather than a
//! bit-packed 128-bit word: `DirectPointer` names its fields, and every
//! consumer re-validates the captured segment version before trusting it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::leaf::Leaf;

/// An advisory pointer into the fat tree, captured at some point in time.
///
/// Stale the instant a rebalance runs; callers must revalidate via
/// [`DirectPointer::validate`] before trusting `segment_id`/`filepos`.
#[derive(Clone)]
pub struct DirectPointer {
    pub leaf: Arc<Leaf>,
    pub segment_id: u16,
    pub captured_version: u64,
}

impl DirectPointer {
    #[must_use]
    pub fn new(leaf: Arc<Leaf>, segment_id: u16, captured_version: u64) -> Self {
        Self {
            leaf,
            segment_id,
            captured_version,
        }
    }

    /// Re-checks that the segment this pointer names hasn't since been
    /// rebalanced away from underneath it.
    #[must_use]
    pub fn validate(&self) -> bool {
        let Some(segment) = self.leaf.segment(self.segment_id) else {
            return false;
        };
        !segment.latch().is_invalid() && segment.latch().version() == self.captured_version
    }
}

/// Reserved key meaning "empty slot".
const EMPTY: u64 = 0;
/// Reserved key meaning "tombstoned slot"; since `1` is also a legitimate
/// (E2I-offset) vertex id, that one vertex is special-cased into a single
/// prefix slot instead of the hashed region (§4.6).
const TOMBSTONE: u64 = 1;

struct Slot {
    key: u64,
    pointer: Option<DirectPointer>,
}

struct Replica {
    slots: Vec<Slot>,
    num_tombstones: u64,
    /// Holds the one entry for vertex id `1`, which would otherwise collide
    /// with the tombstone marker.
    prefix_slot: Option<DirectPointer>,
}

impl Replica {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot { key: EMPTY, pointer: None });
        Self {
            slots,
            num_tombstones: 0,
            prefix_slot: None,
        }
    }

    fn fill_factor(&self) -> f64 {
        let occupied = self.slots.iter().filter(|s| s.key != EMPTY).count();
        occupied as f64 / self.slots.len() as f64
    }

    fn probe(&self, vertex_id: u64) -> usize {
        let mask = self.slots.len() as u64 - 1;
        let mut slot = (hash(vertex_id) & mask) as usize;
        loop {
            match self.slots[slot].key {
                EMPTY => return slot,
                key if key == vertex_id => return slot,
                _ => slot = (slot + 1) & mask as usize,
            }
        }
    }
}

fn hash(vertex_id: u64) -> u64 {
    // FxHash-style multiplicative mix; matches rustc-hash's constant.
    vertex_id.wrapping_mul(0x51_7c_c1_b7_27_22_0a_95)
}

/// The NUMA-replicated vertex table.
pub struct VertexTable {
    replicas: Vec<RwLock<Replica>>,
    min_capacity: usize,
    max_fill_factor: f64,
    resize_xlock: std::sync::Mutex<()>,
    version: AtomicU64,
}

impl VertexTable {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let num_replicas = if config.numa_enabled {
            config.numa_num_nodes as usize
        } else {
            1
        };
        let capacity = config.vertex_table_min_capacity.max(16).next_power_of_two() as usize;

        let replicas = (0..num_replicas)
            .map(|_| RwLock::new(Replica::with_capacity(capacity)))
            .collect();

        Self {
            replicas,
            min_capacity: capacity,
            max_fill_factor: config.vertex_table_max_fill_factor,
            resize_xlock: std::sync::Mutex::new(()),
            version: AtomicU64::new(0),
        }
    }

    fn replica_for(&self, numa_node: u64) -> &RwLock<Replica> {
        let idx = numa_node as usize % self.replicas.len();
        &self.replicas[idx]
    }

    /// Inserts or overwrites an entry. Merger-only; always succeeds.
    pub fn upsert(&self, vertex_id: u64, pointer: DirectPointer) {
        for node in 0..self.replicas.len() {
            self.upsert_replica(node as u64, vertex_id, pointer.clone());
        }
    }

    fn upsert_replica(&self, numa_node: u64, vertex_id: u64, pointer: DirectPointer) {
        if vertex_id == TOMBSTONE {
            let mut replica = self.replica_for(numa_node).write().unwrap_or_else(std::sync::PoisonError::into_inner);
            replica.prefix_slot = Some(pointer);
            return;
        }

        let needs_resize = {
            let replica = self.replica_for(numa_node).read().unwrap_or_else(std::sync::PoisonError::into_inner);
            replica.fill_factor() >= self.max_fill_factor
        };

        if needs_resize {
            self.resize(numa_node);
        }

        let mut replica = self.replica_for(numa_node).write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = replica.probe(vertex_id);
        if replica.slots[slot].key == EMPTY {
            // no-op on occupancy bookkeeping: callers track num_vertices separately
        }
        replica.slots[slot] = Slot {
            key: vertex_id,
            pointer: Some(pointer),
        };
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Updates an existing entry; does nothing (returns `false`) if absent.
    #[must_use]
    pub fn update(&self, vertex_id: u64, pointer: DirectPointer, numa_node: u64) -> bool {
        if vertex_id == TOMBSTONE {
            let mut replica = self.replica_for(numa_node).write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let existed = replica.prefix_slot.is_some();
            if existed {
                replica.prefix_slot = Some(pointer);
            }
            return existed;
        }

        let mut replica = self.replica_for(numa_node).write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = replica.probe(vertex_id);
        if replica.slots[slot].key != vertex_id {
            return false;
        }
        replica.slots[slot].pointer = Some(pointer);
        true
    }

    /// Writes a tombstone over the given vertex's entry, on every replica.
    pub fn remove(&self, vertex_id: u64) {
        for node in 0..self.replicas.len() {
            let mut replica = self.replica_for(node as u64).write().unwrap_or_else(std::sync::PoisonError::into_inner);
            if vertex_id == TOMBSTONE {
                replica.prefix_slot = None;
                continue;
            }
            let slot = replica.probe(vertex_id);
            if replica.slots[slot].key == vertex_id {
                replica.slots[slot] = Slot {
                    key: EMPTY,
                    pointer: None,
                };
                replica.num_tombstones += 1;
            }
        }
    }

    /// Looks up a vertex's advisory direct pointer.
    #[must_use]
    pub fn get(&self, vertex_id: u64, numa_node: u64) -> Option<DirectPointer> {
        let replica = self.replica_for(numa_node).read().unwrap_or_else(std::sync::PoisonError::into_inner);

        if vertex_id == TOMBSTONE {
            return replica.prefix_slot.clone();
        }

        let slot = replica.probe(vertex_id);
        if replica.slots[slot].key == vertex_id {
            replica.slots[slot].pointer.clone()
        } else {
            None
        }
    }

    /// Doubles capacity and rehashes; single-threaded under the resize lock,
    /// other writers to this replica busy-wait for it to finish.
    fn resize(&self, numa_node: u64) {
        let _guard = self.resize_xlock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut replica = self.replica_for(numa_node).write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if replica.fill_factor() < self.max_fill_factor {
            // another thread already resized while we waited for the xlock
            return;
        }

        let new_capacity = (replica.slots.len() * 2).max(self.min_capacity);
        let mut next = Replica::with_capacity(new_capacity);
        next.prefix_slot = replica.prefix_slot.clone();

        for slot in &replica.slots {
            if slot.key != EMPTY {
                let idx = next.probe(slot.key);
                next.slots[idx] = Slot {
                    key: slot.key,
                    pointer: slot.pointer.clone(),
                };
            }
        }

        *replica = next;
    }

    pub fn clear(&self) {
        for replica_lock in &self.replicas {
            let mut replica = replica_lock.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            *replica = Replica::with_capacity(self.min_capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::Leaf;
    use test_log::test;

    fn pointer() -> DirectPointer {
        DirectPointer::new(Leaf::new(1), 0, 0)
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let table = VertexTable::new(&Config::default());
        table.upsert(42, pointer());
        assert!(table.get(42, 0).is_some());
        assert!(table.get(43, 0).is_none());
    }

    #[test]
    fn vertex_id_one_uses_prefix_slot_not_tombstone() {
        let table = VertexTable::new(&Config::default());
        table.upsert(1, pointer());
        assert!(table.get(1, 0).is_some());
        table.remove(1);
        assert!(table.get(1, 0).is_none());
    }

    #[test]
    fn update_on_absent_key_returns_false() {
        let table = VertexTable::new(&Config::default());
        assert!(!table.update(7, pointer(), 0));
    }

    #[test]
    fn resize_preserves_existing_entries() {
        let config = Config::default().vertex_table_max_fill_factor(0.5);
        let table = VertexTable::new(&config);
        for id in 2..50 {
            table.upsert(id, pointer());
        }
        for id in 2..50 {
            assert!(table.get(id, 0).is_some(), "vertex {id} missing after resizes");
        }
    }
}
