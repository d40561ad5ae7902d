// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Cross-segment scan state.
//!
//! A scan walks many segments in sequence; `CursorState` is threaded through
//! each `File::scan` call so a segment can tell whether it's resuming a scan
//! started in a previous segment (e.g. a vertex whose edge list spans a
//! segment boundary).

use crate::key::Key;

/// State carried across segment boundaries by a single logical scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct CursorState {
    /// The last key yielded to the scan's callback, if any.
    pub last_key: Option<Key>,
}

impl CursorState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: u64, destination: u64) {
        self.last_key = Some(Key::new(source, destination));
    }
}
