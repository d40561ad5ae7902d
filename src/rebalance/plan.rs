// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The crawler's output: a description of what the spread operator should
//! do with the window of segments it acquired (§4.7).

use std::sync::Arc;

use crate::leaf::Leaf;

/// What the spread operator should do with an acquired window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Rewrite the window in place, within the same leaf.
    Spread,
    /// The window doesn't fit in one leaf; allocate more leaves.
    Split,
    /// Two adjacent, under-full leaves are combined into one.
    Merge,
}

/// Describes a rebalance: the window of segments acquired and what to do
/// with their contents.
pub struct Plan {
    pub first_leaf: Arc<Leaf>,
    pub last_leaf: Arc<Leaf>,
    pub window_start: u16,
    pub window_end: u16,
    pub num_output_segments: u32,
    pub mode: Mode,
    /// Upper bound on the number of live elements in the window; used to
    /// size the scratchpad and the per-segment save budget.
    pub cardinality_ub: u64,
}

impl Plan {
    #[must_use]
    pub fn window_len(&self) -> u16 {
        self.window_end - self.window_start
    }

    /// Downgrades a split plan to a spread, keeping the same window but
    /// dropping the output segment count back to the window length. Called
    /// by the tune-plan phase when pruning recovered enough space (§4.8).
    pub fn downgrade_to_spread(&mut self) {
        self.mode = Mode::Spread;
        self.num_output_segments = u32::from(self.window_len());
    }
}
