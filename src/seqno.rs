// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Transaction timestamp generation and the global high-water mark.

use std::sync::{
    atomic::{AtomicU64, Ordering::AcqRel, Ordering::Acquire, Ordering::Release},
    Arc,
};

/// A transaction commit timestamp / read timestamp.
pub type SeqNo = u64;

/// Thread-safe, monotonically increasing timestamp generator.
///
/// Used both to hand out transaction IDs and to hand out commit timestamps;
/// the engine keeps two independent counters (see [`crate::engine::Teseo`]).
#[derive(Clone, Default, Debug)]
pub struct SequenceNumberCounter(Arc<AtomicU64>);

impl SequenceNumberCounter {
    /// Creates a new counter, setting it to some previous value.
    #[must_use]
    pub fn new(prev: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Gets the would-be-next value, without incrementing the counter.
    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.0.load(Acquire)
    }

    /// Gets the next value.
    #[must_use]
    pub fn next(&self) -> SeqNo {
        let seqno = self.0.fetch_add(1, Release);
        assert!(seqno < u64::MAX, "ran out of sequence numbers");
        seqno
    }

    /// Sets the counter.
    pub fn set(&self, seqno: SeqNo) {
        self.0.store(seqno, Release);
    }

    /// Maximizes the counter.
    pub fn fetch_max(&self, seqno: SeqNo) {
        self.0.fetch_max(seqno, AcqRel);
    }
}

/// The minimum active transaction's read timestamp.
///
/// Versions with `commit_ts` strictly older than the high-water mark are
/// reclaimable by [`crate::merger`]'s pruning pass. Kept separate from
/// [`SequenceNumberCounter`] because it only ever decreases-then-catches-up
/// (it tracks a minimum, not a running counter), and because it must never
/// exceed the lowest read timestamp of any transaction still active.
#[derive(Clone, Default, Debug)]
pub struct HighWaterMark(Arc<AtomicU64>);

impl HighWaterMark {
    #[must_use]
    pub fn new(initial: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(initial)))
    }

    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.0.load(Acquire)
    }

    pub fn set(&self, value: SeqNo) {
        self.0.store(value, Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn counter_hands_out_increasing_values() {
        let counter = SequenceNumberCounter::default();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn fetch_max_never_decreases() {
        let counter = SequenceNumberCounter::new(10);
        counter.fetch_max(5);
        assert_eq!(counter.get(), 10);
        counter.fetch_max(20);
        assert_eq!(counter.get(), 20);
    }

    #[test]
    fn high_water_mark_tracks_minimum_active_read_ts() {
        let hwm = HighWaterMark::new(0);
        hwm.set(42);
        assert_eq!(hwm.get(), 42);
    }
}
