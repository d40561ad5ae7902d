// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The segment latch: a hand-rolled multi-role fair latch.
//!
//! Packs reader count, writer/rebalancer/wait/xlock/invalid flags and a
//! monotone version counter into a single `AtomicU64`, plus an intrusive
//! FIFO of parked threads guarded by a small `Mutex`. There is no condition
//! variable per waiter: each park is a one-shot `mpsc` channel, matching the
//! "oneshot channels stored in an intrusive FIFO" strategy (SPEC_FULL.md §B).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;

use crate::error::{Error, Result};

const READER_BITS: u32 = 8;
const READER_MAX: u64 = (1 << READER_BITS) - 1;
const READER_SHIFT: u32 = 0;
const WRITER_SHIFT: u32 = READER_BITS;
const REBAL_SHIFT: u32 = WRITER_SHIFT + 1;
const WAIT_SHIFT: u32 = REBAL_SHIFT + 1;
const INVALID_SHIFT: u32 = WAIT_SHIFT + 1;
const VERSION_SHIFT: u32 = INVALID_SHIFT + 1;

const READER_MASK: u64 = READER_MAX << READER_SHIFT;
const WRITER_BIT: u64 = 1 << WRITER_SHIFT;
const REBAL_BIT: u64 = 1 << REBAL_SHIFT;
const WAIT_BIT: u64 = 1 << WAIT_SHIFT;
const INVALID_BIT: u64 = 1 << INVALID_SHIFT;
const VERSION_STEP: u64 = 1 << VERSION_SHIFT;

/// Role a parked (or active) thread is waiting/holding the latch for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Read,
    Write,
    Rebalance,
}

struct Waiter {
    role: Role,
    wake: SyncSender<()>,
}

/// A snapshot of the latch's packed word, decoded for inspection/tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatchSnapshot {
    pub readers: u64,
    pub writer: bool,
    pub rebalancer: bool,
    pub waiting: bool,
    pub invalid: bool,
    pub version: u64,
}

/// The multi-role fair latch protecting one segment.
pub struct SegmentLatch {
    word: AtomicU64,
    queue: Mutex<VecDeque<Waiter>>,
}

impl Default for SegmentLatch {
    fn default() -> Self {
        Self {
            word: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl SegmentLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> LatchSnapshot {
        decode(self.word.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.word.load(Ordering::Acquire) >> VERSION_SHIFT
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.word.load(Ordering::Acquire) & INVALID_BIT != 0
    }

    /// Marks the segment invalid; used by the rebalancer after a split/merge
    /// dissolves it. Any outstanding optimistic reader will fail validation.
    pub fn invalidate(&self) {
        self.word.fetch_or(INVALID_BIT, Ordering::AcqRel);
    }

    /// Enters as a reader. Fair by default: if the wait flag is set, queues
    /// behind whoever is already waiting rather than jumping the line.
    pub fn reader_enter(&self, fair: bool) -> Result<()> {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let waiting = current & WAIT_BIT != 0;
            let busy = current & (WRITER_BIT | REBAL_BIT) != 0;

            if (fair && waiting) || busy {
                self.park(Role::Read);
                continue;
            }

            let readers = (current & READER_MASK) >> READER_SHIFT;
            if readers >= READER_MAX {
                return Err(Error::TooManyReaders);
            }

            let next = current + (1 << READER_SHIFT);
            if self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Leaves reader role. Wakes the next group if this was the last reader.
    pub fn reader_exit(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let readers = (current & READER_MASK) >> READER_SHIFT;
            debug_assert!(readers > 0, "reader_exit without a matching reader_enter");

            let next = current - (1 << READER_SHIFT);
            if self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if readers == 1 && current & WAIT_BIT != 0 {
                    self.wake_next();
                }
                return;
            }
        }
    }

    /// Enters as the single writer, parking if anyone else holds the latch.
    pub fn writer_enter(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let readers = (current & READER_MASK) >> READER_SHIFT;
            let busy = current & (WRITER_BIT | REBAL_BIT) != 0 || readers > 0;

            if busy {
                self.park(Role::Write);
                continue;
            }

            let next = current | WRITER_BIT;
            if self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Leaves writer role, bumping the version and waking the next group.
    pub fn writer_exit(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            debug_assert!(current & WRITER_BIT != 0, "writer_exit without writer_enter");

            let next = (current & !WRITER_BIT).wrapping_add(VERSION_STEP);
            if self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if current & WAIT_BIT != 0 {
                    self.wake_next();
                }
                return;
            }
        }
    }

    /// Enters as rebalancer. Caller must have already ensured, via the
    /// segment's own `rebal_requested` flag, that a rebalance was asked for.
    pub fn rebalancer_enter(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let readers = (current & READER_MASK) >> READER_SHIFT;
            let busy = current & (WRITER_BIT | REBAL_BIT) != 0 || readers > 0;

            if busy {
                self.park(Role::Rebalance);
                continue;
            }

            let next = current | REBAL_BIT;
            if self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Leaves rebalancer role, bumping the version and waking the next group.
    pub fn rebalancer_exit(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            debug_assert!(current & REBAL_BIT != 0, "rebalancer_exit without rebalancer_enter");

            let next = (current & !REBAL_BIT).wrapping_add(VERSION_STEP);
            if self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if current & WAIT_BIT != 0 {
                    self.wake_next();
                }
                return;
            }
        }
    }

    /// Returns the current version without taking any role. The caller must
    /// still re-validate after reading, via [`Self::optimistic_validate`].
    #[must_use]
    pub fn optimistic_enter(&self) -> u64 {
        self.version()
    }

    /// Fails with [`Error::Abort`] if the version moved or the segment was
    /// invalidated since `captured`.
    pub fn optimistic_validate(&self, captured: u64) -> Result<()> {
        let current = self.word.load(Ordering::Acquire);
        if current & INVALID_BIT != 0 || (current >> VERSION_SHIFT) != captured {
            return Err(Error::Abort);
        }
        Ok(())
    }

    fn park(&self, role: Role) {
        let (tx, rx) = sync_channel::<()>(1);
        {
            let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            queue.push_back(Waiter { role, wake: tx });
            self.word.fetch_or(WAIT_BIT, Ordering::AcqRel);
        }
        let _: std::result::Result<(), _> = block_on_park(&rx);
    }

    /// Drains a wakeable prefix of the queue: a run of readers, or a single
    /// writer/rebalancer, never both together (spec §4.1's queue policy).
    fn wake_next(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(front) = queue.front() else {
            self.word.fetch_and(!WAIT_BIT, Ordering::AcqRel);
            return;
        };

        let role = front.role;
        let mut woken = Vec::new();

        match role {
            Role::Read => {
                while let Some(w) = queue.front() {
                    if w.role != Role::Read {
                        break;
                    }
                    woken.push(queue.pop_front().unwrap());
                }
            }
            Role::Write | Role::Rebalance => {
                woken.push(queue.pop_front().unwrap());
            }
        }

        if queue.is_empty() {
            self.word.fetch_and(!WAIT_BIT, Ordering::AcqRel);
        }

        drop(queue);

        for w in woken {
            let _ = w.wake.send(());
        }
    }
}

fn block_on_park(rx: &Receiver<()>) -> std::result::Result<(), std::sync::mpsc::RecvError> {
    rx.recv()
}

fn decode(word: u64) -> LatchSnapshot {
    LatchSnapshot {
        readers: (word & READER_MASK) >> READER_SHIFT,
        writer: word & WRITER_BIT != 0,
        rebalancer: word & REBAL_BIT != 0,
        waiting: word & WAIT_BIT != 0,
        invalid: word & INVALID_BIT != 0,
        version: word >> VERSION_SHIFT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use test_log::test;

    #[test]
    fn reader_enter_exit_roundtrips() {
        let latch = SegmentLatch::new();
        latch.reader_enter(true).unwrap();
        assert_eq!(latch.snapshot().readers, 1);
        latch.reader_exit();
        assert_eq!(latch.snapshot().readers, 0);
    }

    #[test]
    fn writer_exit_bumps_version() {
        let latch = SegmentLatch::new();
        let before = latch.version();
        latch.writer_enter();
        latch.writer_exit();
        assert_eq!(latch.version(), before + 1);
    }

    #[test]
    fn optimistic_validate_fails_after_writer_commits() {
        let latch = SegmentLatch::new();
        let v = latch.optimistic_enter();
        latch.writer_enter();
        latch.writer_exit();
        assert!(matches!(latch.optimistic_validate(v), Err(Error::Abort)));
    }

    #[test]
    fn invalidated_latch_fails_optimistic_validate() {
        let latch = SegmentLatch::new();
        let v = latch.optimistic_enter();
        latch.invalidate();
        assert!(matches!(latch.optimistic_validate(v), Err(Error::Abort)));
    }

    #[test]
    fn queued_writer_wakes_after_reader_exits() {
        let latch = Arc::new(SegmentLatch::new());
        latch.reader_enter(true).unwrap();

        let latch2 = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            latch2.writer_enter();
            latch2.writer_exit();
        });

        // give the writer a chance to park behind the active reader
        thread::sleep(std::time::Duration::from_millis(20));
        latch.reader_exit();
        handle.join().unwrap();
    }
}
