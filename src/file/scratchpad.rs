// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The scratchpad: an ordered, in-memory staging area used by the spread
//! operator's load/prune/save phases (§4.8).

use std::sync::Arc;

use crate::key::Key;
use crate::seqno::SeqNo;
use crate::value::Update;
use crate::version::VersionRecord;

use super::slots::{EDGE_QWORDS, VERTEX_QWORDS};

/// One record loaded from a segment, pending pruning and write-back.
pub struct ScratchpadSlot {
    pub key: Key,
    pub content: Option<Update>,
    pub undo: Option<Arc<VersionRecord>>,
}

impl ScratchpadSlot {
    #[must_use]
    pub fn qwords(&self) -> u32 {
        match &self.content {
            Some(Update::Vertex(_)) => VERTEX_QWORDS,
            Some(Update::Edge { .. }) => EDGE_QWORDS,
            None => 0,
        }
    }
}

/// Ordered buffer concatenating the live contents of every segment in a
/// crawler's window, in key order.
#[derive(Default)]
pub struct Scratchpad {
    slots: Vec<ScratchpadSlot>,
}

impl Scratchpad {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Key, content: Option<Update>, undo: Option<Arc<VersionRecord>>) {
        self.slots.push(ScratchpadSlot { key, content, undo });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn slots(&self) -> &[ScratchpadSlot] {
        &self.slots
    }

    /// Drops undo records predating `high_water_mark` and discards
    /// insert-then-remove pairs with no surviving content or undo chain.
    /// Returns the total qword footprint remaining after pruning.
    #[must_use]
    pub fn prune(&mut self, high_water_mark: SeqNo) -> u32 {
        self.slots.retain_mut(|slot| {
            let mut head = slot.undo.take();
            while let Some(record) = &head {
                let prunable = record.transaction.is_committed() && record.transaction.commit_ts() < high_water_mark;
                if !prunable {
                    break;
                }
                head = record.next.clone();
            }
            slot.undo = head;
            slot.content.is_some() || slot.undo.is_some()
        });

        self.slots.iter().map(ScratchpadSlot::qwords).sum()
    }

    /// Splits the scratchpad into `num_chunks` contiguous, roughly
    /// equal-weight (by qword cost) chunks, preserving key order.
    #[must_use]
    pub fn split_by_budget(self, num_chunks: usize) -> Vec<Vec<ScratchpadSlot>> {
        if num_chunks == 0 || self.slots.is_empty() {
            return vec![self.slots];
        }

        let total: u32 = self.slots.iter().map(ScratchpadSlot::qwords).sum();
        let target = (total / num_chunks as u32).max(1);

        let mut chunks = Vec::with_capacity(num_chunks);
        let mut current = Vec::new();
        let mut current_weight = 0u32;

        for slot in self.slots {
            if current_weight >= target && chunks.len() + 1 < num_chunks {
                chunks.push(std::mem::take(&mut current));
                current_weight = 0;
            }
            current_weight += slot.qwords();
            current.push(slot);
        }
        chunks.push(current);

        chunks
    }
}
