// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! MVCC undo/version chains attached to vertex and edge slots.
//!
//! Chains are ordered newest-first. A reader walks the chain until it finds
//! a node whose writer transaction's commit timestamp is `<= read_ts`, or
//! until the chain is exhausted (meaning the slot's current content, as
//! stored in the file, is the visible value). The owner transaction of a
//! chain always sees its own, most recent version regardless of timestamp.

use crate::seqno::SeqNo;
use crate::value::Update;
use std::sync::Arc;

/// What kind of change a version record undoes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoKind {
    Insert,
    Remove,
}

/// Reference to the transaction that produced a version record.
///
/// Transaction identity/commit-ordering bookkeeping is an external
/// collaborator (spec.md §1 non-goals): we only need enough here to decide
/// visibility and ownership.
#[derive(Clone, Debug)]
pub struct TransactionRef {
    pub transaction_id: u64,
    pub commit_ts: Arc<std::sync::atomic::AtomicU64>,
}

impl TransactionRef {
    /// A sentinel meaning "not yet committed" (`u64::MAX`).
    pub const UNCOMMITTED: u64 = u64::MAX;

    #[must_use]
    pub fn commit_ts(&self) -> SeqNo {
        self.commit_ts.load(std::sync::atomic::Ordering::Acquire)
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.commit_ts() != Self::UNCOMMITTED
    }
}

/// One link of an undo chain: the previous value of a slot plus who wrote it.
pub struct VersionRecord {
    pub kind: UndoKind,
    pub transaction: TransactionRef,
    /// Previous content of the slot (`None` if the prior state was "absent",
    /// i.e. this version's insert created the slot from nothing).
    pub payload: Option<Update>,
    pub next: Option<Arc<VersionRecord>>,
}

impl VersionRecord {
    #[must_use]
    pub fn new(
        kind: UndoKind,
        transaction: TransactionRef,
        payload: Option<Update>,
        next: Option<Arc<VersionRecord>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            transaction,
            payload,
            next,
        })
    }

    /// Walks the chain starting at `head`, returning the value visible to a
    /// reader at `read_ts`.
    ///
    /// Each node's `payload` is the slot's content *before* that node's own
    /// write landed; the node newest-to-oldest order means the first node
    /// whose write the reader can see tells us nothing about the current
    /// value — its write already happened. What we're after is the newest
    /// write the reader *cannot* see yet, whose `payload` is exactly the
    /// state as of just before that write. Walking off the end of the chain
    /// without finding an invisible write means the head's write (and thus
    /// the file's current content) is what the reader should see.
    ///
    /// `owner_txn_id`, if given, lets the chain's own writer see its most
    /// recent (possibly uncommitted) version regardless of `read_ts`.
    #[must_use]
    pub fn find_visible(
        head: &Option<Arc<VersionRecord>>,
        read_ts: SeqNo,
        owner_txn_id: Option<u64>,
    ) -> VisibleSlot {
        let mut cursor = head.clone();
        let mut shadowed_by_invisible_write: Option<Option<Update>> = None;

        while let Some(node) = cursor {
            let is_owner = owner_txn_id == Some(node.transaction.transaction_id);
            let write_visible = is_owner || (node.transaction.is_committed() && node.transaction.commit_ts() <= read_ts);

            if write_visible {
                return match shadowed_by_invisible_write {
                    Some(payload) => VisibleSlot::Payload(payload),
                    None => VisibleSlot::CurrentFileContent,
                };
            }

            shadowed_by_invisible_write = Some(node.payload);
            cursor = node.next.clone();
        }

        match shadowed_by_invisible_write {
            Some(payload) => VisibleSlot::Payload(payload),
            None => VisibleSlot::CurrentFileContent,
        }
    }
}

/// Outcome of walking a version chain.
pub enum VisibleSlot {
    /// The value as of `read_ts`, reconstructed from an undo entry.
    /// `None` means absent — the slot did not exist yet at that point.
    Payload(Option<Update>),
    /// No undo entry shadows the reader: whatever the file currently stores
    /// in the slot is the visible state.
    CurrentFileContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn committed_txn(id: u64, ts: SeqNo) -> TransactionRef {
        TransactionRef {
            transaction_id: id,
            commit_ts: Arc::new(std::sync::atomic::AtomicU64::new(ts)),
        }
    }

    #[test]
    fn reader_sees_newest_committed_version_at_or_before_read_ts() {
        // chain: txn@30 (newest) -> txn@20 -> txn@10 (oldest)
        let oldest = VersionRecord::new(UndoKind::Insert, committed_txn(1, 10), None, None);
        let mid = VersionRecord::new(
            UndoKind::Insert,
            committed_txn(2, 20),
            Some(Update::Vertex(crate::value::VertexRecord::new(1))),
            Some(oldest),
        );
        let head = Some(VersionRecord::new(
            UndoKind::Remove,
            committed_txn(3, 30),
            Some(Update::Vertex(crate::value::VertexRecord::new(1))),
            Some(mid),
        ));

        // read_ts 25 is after txn 2 committed (20) but before txn 3 (30), so
        // the reader should see the state txn 2 wrote: present.
        match VersionRecord::find_visible(&head, 25, None) {
            VisibleSlot::Payload(payload) => assert!(payload.is_some()),
            VisibleSlot::CurrentFileContent => panic!("expected a reconstructed payload"),
        }

        // read_ts 5 predates even the oldest write: nothing existed yet.
        match VersionRecord::find_visible(&head, 5, None) {
            VisibleSlot::Payload(payload) => assert!(payload.is_none()),
            VisibleSlot::CurrentFileContent => panic!("expected absent, not current content"),
        }

        // read_ts 100 is after everything, including the newest (head) write:
        // the file's current content applies directly.
        match VersionRecord::find_visible(&head, 100, None) {
            VisibleSlot::CurrentFileContent => {}
            VisibleSlot::Payload(_) => panic!("expected current file content"),
        }
    }

    #[test]
    fn owner_transaction_sees_its_own_uncommitted_write() {
        let uncommitted = committed_txn(42, TransactionRef::UNCOMMITTED);
        let head = Some(VersionRecord::new(UndoKind::Insert, uncommitted, None, None));

        match VersionRecord::find_visible(&head, 0, Some(42)) {
            VisibleSlot::CurrentFileContent => {}
            VisibleSlot::Payload(_) => panic!("owner should see its own write as current content"),
        }

        // A different reader, at any read_ts, does not see the uncommitted write
        // and falls back to whatever the single record shadows (absent, here).
        match VersionRecord::find_visible(&head, SeqNo::MAX, None) {
            VisibleSlot::Payload(payload) => assert!(payload.is_none()),
            VisibleSlot::CurrentFileContent => panic!("non-owner must not see uncommitted write as current"),
        }
    }
}
