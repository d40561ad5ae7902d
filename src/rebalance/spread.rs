// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The spread operator: executes a [`Plan`] in four phases — load, prune,
//! tune, save (§4.8).

use std::sync::Arc;

use crate::error::Result;
use crate::file::{File, Scratchpad};
use crate::index::{FatTreeIndex, IndexEntry};
use crate::key::Key;
use crate::leaf::Leaf;
use crate::seqno::SeqNo;

use super::crawler::release_window;
use super::plan::{Mode, Plan};

/// Number of empty segments to interleave per filled one when a spread
/// leaves room for future growth, matching the window's current ratio.
fn empty_per_filled(num_output: u32, num_filled: u32) -> u32 {
    if num_filled == 0 {
        0
    } else {
        num_output / num_filled - 1
    }
}

/// Runs the full load -> prune -> tune -> save pipeline for `plan`,
/// rewriting the fence keys of every affected segment in `index`.
pub fn execute(
    mut plan: Plan,
    index: &FatTreeIndex,
    high_water_mark: SeqNo,
    segment_capacity_qwords: u32,
) -> Result<()> {
    let scratchpad = load(&plan);
    let (scratchpad, space_required) = prune(scratchpad, high_water_mark);
    tune(&mut plan, space_required, segment_capacity_qwords);
    save(&plan, scratchpad, index, segment_capacity_qwords);

    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            segment.mark_rebalanced();
        }
    }
    release_window(&plan);

    Ok(())
}

fn load(plan: &Plan) -> Scratchpad {
    let mut scratchpad = Scratchpad::new();

    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            segment.load(&mut scratchpad);
        }
    }

    if !Arc::ptr_eq(&plan.first_leaf, &plan.last_leaf) {
        for segment in plan.last_leaf.segments() {
            segment.load(&mut scratchpad);
        }
    }

    scratchpad
}

fn prune(mut scratchpad: Scratchpad, high_water_mark: SeqNo) -> (Scratchpad, u32) {
    let space_required = scratchpad.prune(high_water_mark);
    (scratchpad, space_required)
}

fn tune(plan: &mut Plan, space_required: u32, segment_capacity_qwords: u32) {
    if plan.mode != Mode::Split {
        return;
    }

    let window_capacity = u32::from(plan.window_len()) * segment_capacity_qwords;
    if space_required <= window_capacity {
        plan.downgrade_to_spread();
    }
}

fn save(plan: &Plan, scratchpad: Scratchpad, index: &FatTreeIndex, segment_capacity_qwords: u32) {
    match plan.mode {
        Mode::Spread | Mode::Merge => save_in_place(plan, scratchpad, index, segment_capacity_qwords),
        Mode::Split => save_split(plan, scratchpad, index, segment_capacity_qwords),
    }
}

/// Rewrites the existing window's segments in place, interleaving empty
/// segments to leave room for future growth.
fn save_in_place(plan: &Plan, scratchpad: Scratchpad, index: &FatTreeIndex, segment_capacity_qwords: u32) {
    let window_len = plan.window_len();
    if window_len == 0 {
        return;
    }

    let num_filled = window_len.min(
        (1 + scratchpad.len() as u32 / segment_capacity_qwords.max(1)).max(1) as u16,
    );
    let stride = empty_per_filled(u32::from(window_len), u32::from(num_filled)).max(0) + 1;

    let chunks = scratchpad.split_by_budget(num_filled as usize);

    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            segment.to_sparse_file(segment_capacity_qwords);
        }
    }

    let mut old_fence_keys = Vec::new();
    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            old_fence_keys.push(segment.fence_key());
        }
    }
    for key in old_fence_keys {
        index.remove(key);
    }

    let mut chunk_iter = chunks.into_iter();
    let mut slot_id = plan.window_end;
    for filled_index in 0..num_filled {
        slot_id -= stride as u16;
        let Some(chunk) = chunk_iter.next() else { break };
        write_chunk(plan.first_leaf.segment(slot_id), &chunk, segment_capacity_qwords);

        let low_fence = chunk.first().map_or(Key::MAX, |s| s.key);
        if let Some(segment) = plan.first_leaf.segment(slot_id) {
            segment.set_fence_key(low_fence);
            if low_fence != Key::MAX {
                index.insert(low_fence, IndexEntry::new(Arc::clone(&plan.first_leaf), slot_id));
            }
        }
        let _ = filled_index;
    }
}

/// The window outgrew the leaf: allocate a sibling leaf, split the window's
/// live contents between the existing leaf and the new one.
fn save_split(plan: &Plan, scratchpad: Scratchpad, index: &FatTreeIndex, segment_capacity_qwords: u32) {
    let new_leaf = Leaf::with_capacity(plan.first_leaf.num_segments() as u32, segment_capacity_qwords);
    new_leaf.set_high_fence_key(plan.first_leaf.high_fence_key());
    plan.first_leaf.set_high_fence_key(Key::MAX);
    new_leaf.set_next(plan.first_leaf.next());
    plan.first_leaf.set_next(Some(Arc::clone(&new_leaf)));

    let half = (plan.window_len() as usize / 2).max(1);
    let chunks = scratchpad.split_by_budget(half * 2);
    let midpoint = chunks.len() / 2;

    let mut old_fence_keys = Vec::new();
    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            old_fence_keys.push(segment.fence_key());
        }
    }
    for key in old_fence_keys {
        index.remove(key);
    }

    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            segment.to_sparse_file(segment_capacity_qwords);
        }
    }

    let mut slot_id = plan.window_start;
    for chunk in chunks.iter().take(midpoint) {
        if let Some(segment) = plan.first_leaf.segment(slot_id) {
            write_chunk(Some(segment), chunk, segment_capacity_qwords);
            let low_fence = chunk.first().map_or(Key::MAX, |s| s.key);
            segment.set_fence_key(low_fence);
            if low_fence != Key::MAX {
                index.insert(low_fence, IndexEntry::new(Arc::clone(&plan.first_leaf), slot_id));
            }
        }
        slot_id += 1;
    }

    let mut new_slot_id = 0u16;
    for chunk in chunks.iter().skip(midpoint) {
        if let Some(segment) = new_leaf.segment(new_slot_id) {
            write_chunk(Some(segment), chunk, segment_capacity_qwords);
            let low_fence = chunk.first().map_or(Key::MAX, |s| s.key);
            segment.set_fence_key(low_fence);
            if low_fence != Key::MAX {
                index.insert(low_fence, IndexEntry::new(Arc::clone(&new_leaf), new_slot_id));
            }
        }
        new_slot_id += 1;
    }
}

fn write_chunk(segment: Option<&crate::segment::Segment>, chunk: &[crate::file::ScratchpadSlot], capacity_qwords: u32) {
    let Some(segment) = segment else { return };
    segment.replace_with(File::Sparse(crate::file::SparseFile::from_scratchpad(chunk, capacity_qwords)));
}
