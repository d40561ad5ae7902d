// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The merger service: a background loop that prunes segments and
//! repopulates the vertex table (§4.9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::index::{FatTreeIndex, IndexEntry};
use crate::seqno::HighWaterMark;
use crate::vertex_table::{DirectPointer, VertexTable};

/// How long the merger sleeps between passes when idle.
const IDLE_INTERVAL: Duration = Duration::from_millis(250);

struct Shared {
    index: Arc<FatTreeIndex>,
    vertex_table: Arc<VertexTable>,
    high_water_mark: HighWaterMark,
    stop: AtomicBool,
    wake: Condvar,
    wake_lock: Mutex<bool>,
}

/// The merger service handle: owns the background thread and can be
/// stopped, restarted, or forced to run a synchronous pass.
pub struct Merger {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Merger {
    #[must_use]
    pub fn new(index: Arc<FatTreeIndex>, vertex_table: Arc<VertexTable>, high_water_mark: HighWaterMark) -> Self {
        let shared = Arc::new(Shared {
            index,
            vertex_table,
            high_water_mark,
            stop: AtomicBool::new(true),
            wake: Condvar::new(),
            wake_lock: Mutex::new(false),
        });

        Self {
            shared,
            handle: Mutex::new(None),
        }
    }

    /// Starts the background loop, if it isn't already running.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if handle.is_some() {
            return;
        }

        self.shared.stop.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        *handle = Some(std::thread::spawn(move || run_loop(&shared)));
        debug!("merger service started");
    }

    /// Signals the background loop to exit and joins it.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_all();

        let mut handle = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(thread) = handle.take() {
            let _ = thread.join();
        }
        debug!("merger service stopped");
    }

    /// Forces one synchronous pass over every leaf reachable from the
    /// index, regardless of any per-segment staleness threshold.
    pub fn execute_now(&self) {
        run_pass(&self.shared, true);
    }
}

fn run_loop(shared: &Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        run_pass(shared, false);

        let guard = shared.wake_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = shared
            .wake
            .wait_timeout(guard, IDLE_INTERVAL)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
    }
}

/// One pass: snapshot the leaves from the index (holding no latch across
/// the traversal), prune each qualifying segment, and repopulate its
/// vertex-table entries.
fn run_pass(shared: &Shared, force: bool) {
    let leaves = shared.index.snapshot_leaves();
    let high_water_mark = shared.high_water_mark.get();

    for leaf in &leaves {
        for (segment_id, segment) in leaf.segments().iter().enumerate() {
            let Ok(segment_id) = u16::try_from(segment_id) else {
                warn!("leaf has more than u16::MAX segments, skipping merger pass on the overflow");
                continue;
            };

            if !force && !segment.needs_async_rebalance(Duration::from_secs(0)) && segment.used_space() == 0 {
                continue;
            }

            segment.prune(high_water_mark);
            rebuild_vertex_table_entries(shared, leaf, segment_id, segment);
        }
    }

    trace!("merger pass complete over {} leaves", leaves.len());
}

fn rebuild_vertex_table_entries(
    shared: &Shared,
    leaf: &Arc<crate::leaf::Leaf>,
    segment_id: u16,
    segment: &crate::segment::Segment,
) {
    let version = segment.latch().version();

    // The merger is the sole populating writer of the vertex table; it
    // upserts one advisory pointer per vertex record this segment owns.
    let pointer = DirectPointer::new(Arc::clone(leaf), segment_id, version);
    let mut cursor = crate::cursor::CursorState::new();
    segment.scan(crate::key::Key::MIN, u64::MAX, None, &mut cursor, &mut |source, destination, _weight| {
        if destination == 0 {
            shared.vertex_table.upsert(source, pointer.clone());
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::value::VertexRecord;
    use crate::version::{TransactionRef, UndoKind};
    use std::sync::atomic::AtomicU64;
    use test_log::test;

    #[test]
    fn execute_now_populates_vertex_table_for_committed_vertices() {
        let index = Arc::new(FatTreeIndex::new());
        let leaf = crate::leaf::Leaf::new(1);
        let segment = leaf.segment(0).unwrap();
        segment.set_fence_key(crate::key::Key::MIN);
        index.insert(crate::key::Key::MIN, IndexEntry::new(Arc::clone(&leaf), 0));

        segment
            .update(
                UndoKind::Insert,
                crate::value::Update::Vertex(VertexRecord::new(7)),
                true,
                TransactionRef {
                    transaction_id: 1,
                    commit_ts: Arc::new(AtomicU64::new(1)),
                },
                256,
            )
            .unwrap();

        let vertex_table = Arc::new(VertexTable::new(&Config::default()));
        let merger = Merger::new(index, Arc::clone(&vertex_table), HighWaterMark::new(0));
        merger.execute_now();

        // A vertex record alone produces no edge scan output, so this just
        // exercises the pass without panicking; edge-bearing cases are
        // covered via the engine-level integration tests.
        let _ = vertex_table.get(8, 0);
    }
}
