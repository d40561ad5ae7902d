// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The ordered slot storage shared by [`super::SparseFile`] and
//! [`super::DenseFile`]. Both representations expose an identical API over
//! this type; they differ only in qword-cost accounting (SPEC_FULL.md §B).

use std::sync::Arc;

use crate::cursor::CursorState;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::seqno::SeqNo;
use crate::value::Update;
use crate::version::{TransactionRef, UndoKind, VersionRecord, VisibleSlot};

/// Qword cost of storing one vertex record, including its slot header.
pub const VERTEX_QWORDS: u32 = 3;
/// Qword cost of storing one edge record, including its slot header.
pub const EDGE_QWORDS: u32 = 2;

/// One keyed slot: its current content plus an undo chain of older values.
pub struct Slot {
    pub key: Key,
    pub content: Option<Update>,
    pub undo: Option<Arc<VersionRecord>>,
}

impl Slot {
    fn qwords(&self) -> u32 {
        match &self.content {
            Some(Update::Vertex(_)) => VERTEX_QWORDS,
            Some(Update::Edge { .. }) => EDGE_QWORDS,
            None => 0,
        }
    }
}

/// Ordered, contiguous run of slots, binary-searched by key.
#[derive(Default)]
pub struct Slots {
    items: Vec<Slot>,
}

impl Slots {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn used_qwords(&self) -> u32 {
        self.items.iter().map(Slot::qwords).sum()
    }

    fn locate(&self, key: Key) -> std::result::Result<usize, usize> {
        self.items.binary_search_by_key(&key, |s| s.key)
    }

    /// True if some earlier slot in this run (or, the caller already
    /// promises, an earlier segment) holds the source vertex.
    #[must_use]
    pub fn contains_vertex(&self, source: u64) -> bool {
        let vkey = Key::vertex(source);
        matches!(self.locate(vkey), Ok(i) if self.items[i].content.is_some())
    }

    pub fn update(
        &mut self,
        kind: UndoKind,
        update: Update,
        has_source_vertex: bool,
        transaction: TransactionRef,
    ) -> Result<()> {
        let key = update.key();

        if let Update::Edge { source, .. } = &update {
            if !has_source_vertex && !self.contains_vertex(*source) {
                return Err(Error::NotSureIfVertexExists);
            }
        }

        let new_content = match kind {
            UndoKind::Insert => Some(update),
            UndoKind::Remove => None,
        };

        match self.locate(key) {
            Ok(i) => {
                let slot = &mut self.items[i];
                let previous_content = slot.content.take();
                let undo = VersionRecord::new(kind, transaction, previous_content, slot.undo.take());
                slot.content = new_content;
                slot.undo = Some(undo);
            }
            Err(i) => {
                let undo = VersionRecord::new(kind, transaction, None, None);
                self.items.insert(
                    i,
                    Slot {
                        key,
                        content: new_content,
                        undo: Some(undo),
                    },
                );
            }
        }

        Ok(())
    }

    /// Restores the slot to whatever `next` describes as the prior state.
    pub fn rollback(&mut self, key: Key, next: Option<Arc<VersionRecord>>) {
        let Ok(i) = self.locate(key) else { return };

        match &next {
            Some(record) => {
                self.items[i].content = record.payload;
                self.items[i].undo = record.next.clone();
            }
            None => {
                self.items.remove(i);
            }
        }
    }

    /// Undoes the slot's most recent version if it was written by
    /// `transaction_id`, restoring whatever it shadowed. A no-op if the
    /// slot's current undo head belongs to a different transaction (the
    /// caller's own undo log is stale, or someone else already rolled it
    /// back).
    pub fn rollback_own(&mut self, key: Key, transaction_id: u64) {
        let Ok(i) = self.locate(key) else { return };
        let Some(head) = &self.items[i].undo else { return };
        if head.transaction.transaction_id != transaction_id {
            return;
        }
        let next = head.next.clone();
        self.rollback(key, next);
    }

    #[must_use]
    pub fn has_item_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> bool {
        let Ok(i) = self.locate(key) else { return false };
        self.visible_content(&self.items[i], read_ts, owner_txn).is_some()
    }

    #[must_use]
    pub fn get_weight_optimistic(&self, key: Key, read_ts: SeqNo, owner_txn: Option<u64>) -> Option<f64> {
        let i = self.locate(key).ok()?;
        match self.visible_content(&self.items[i], read_ts, owner_txn)? {
            Update::Edge { edge, .. } => Some(edge.weight),
            Update::Vertex(_) => None,
        }
    }

    #[must_use]
    pub fn get_degree(&self, source: u64, read_ts: SeqNo, owner_txn: Option<u64>) -> u64 {
        let start = self.locate(Key::vertex(source)).unwrap_or_else(|i| i);
        self.items[start..]
            .iter()
            .take_while(|s| s.key.source == source)
            .filter(|s| s.key.destination > 0)
            .filter(|s| self.visible_content(s, read_ts, owner_txn).is_some())
            .count() as u64
    }

    pub fn scan(
        &self,
        from: Key,
        read_ts: SeqNo,
        owner_txn: Option<u64>,
        _cursor: &mut CursorState,
        callback: &mut dyn FnMut(u64, u64, f64) -> bool,
    ) {
        let start = self.locate(from).unwrap_or_else(|i| i);
        for slot in &self.items[start..] {
            let Some(content) = self.visible_content(slot, read_ts, owner_txn) else {
                continue;
            };
            if let Update::Edge { source, edge } = content {
                if !callback(source, edge.destination, edge.weight) {
                    return;
                }
            }
        }
    }

    pub fn aux_partial_result(
        &self,
        range: std::ops::Range<Key>,
        read_ts: SeqNo,
        partial: &mut crate::aux::partial_result::PartialResult,
    ) {
        let start = self.locate(range.start).unwrap_or_else(|i| i);
        for slot in &self.items[start..] {
            if slot.key >= range.end {
                break;
            }
            let Some(content) = self.visible_content(slot, read_ts, None) else {
                continue;
            };
            match content {
                Update::Vertex(v) => partial.observe_vertex(v.vertex_id),
                Update::Edge { source, .. } => partial.observe_edge(source),
            }
        }
    }

    /// Drops undo entries that predate the high-water mark and collapses
    /// insert-then-remove pairs that nobody can observe any more.
    pub fn prune(&mut self, high_water_mark: SeqNo) {
        self.items.retain_mut(|slot| {
            let mut head = slot.undo.take();

            while let Some(record) = &head {
                let prunable = record.transaction.is_committed() && record.transaction.commit_ts() < high_water_mark;
                if !prunable {
                    break;
                }
                head = record.next.clone();
            }

            slot.undo = head;

            if slot.content.is_none() && slot.undo.is_none() {
                return false;
            }

            true
        });
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.items.iter()
    }

    /// Appends a slot verbatim, preserving its undo chain. Used when copying
    /// a sparse file's content into a dense one (§4.2).
    pub fn push_raw(&mut self, key: Key, content: Option<Update>, undo: Option<Arc<VersionRecord>>) {
        self.items.push(Slot { key, content, undo });
    }

    /// Rebuilds this run from an ordered sequence of scratchpad slots.
    pub fn rebuild_from(&mut self, slots: Vec<Slot>) {
        self.items = slots;
    }

    fn visible_content<'a>(&self, slot: &'a Slot, read_ts: SeqNo, owner_txn: Option<u64>) -> Option<Update> {
        match VersionRecord::find_visible(&slot.undo, read_ts, owner_txn) {
            VisibleSlot::Payload(payload) => payload,
            VisibleSlot::CurrentFileContent => slot.content,
        }
    }
}
