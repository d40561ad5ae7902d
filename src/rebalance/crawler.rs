// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The crawler: acquires a contiguous, coherent window of segments around
//! the one that requested a rebalance (§4.7).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::leaf::Leaf;

use super::plan::{Mode, Plan};

/// Computes how many segments the crawler should try to gather before it
/// stops expanding and declares the window big enough to absorb the
/// imbalance without splitting (§6, `crawler_calibrator_tree_height`).
///
/// `height == 0` defaults to one level below `log2(num_segments)`, halving
/// the leaf; an explicit height instead targets `2^height` segments,
/// clamped to the leaf's actual size.
fn capacity_target(num_segments: usize, calibrator_tree_height: u32) -> u16 {
    let num_segments = num_segments.max(1);
    let height = if calibrator_tree_height == 0 {
        num_segments.max(2).ilog2().saturating_sub(1).max(1)
    } else {
        calibrator_tree_height
    };

    let target = 1u64.checked_shl(height).unwrap_or(u64::MAX);
    target.min(num_segments as u64) as u16
}

/// Walks left and right from `origin_segment_id`, acquiring each neighbour
/// in rebalancer role, until the window holds enough slack to absorb the
/// imbalance, or both leaf boundaries are reached (a split).
///
/// Returns [`Error::RebalanceNotNecessary`] if, while walking, a neighbour
/// is found to already be mid-rebalance by another crawler that holds a
/// lower-addressed (earlier `segment_id`) segment than ours — per the
/// tie-break rule, that crawler wins and ours backs off.
pub fn acquire_window(leaf: &Arc<Leaf>, origin_segment_id: u16, calibrator_tree_height: u32) -> Result<Plan> {
    let _structural = leaf.lock_structural();

    let origin = leaf
        .segment(origin_segment_id)
        .ok_or_else(|| Error::Internal("crawler origin segment out of range".into()))?;
    origin.latch().rebalancer_enter();

    let mut window_start = origin_segment_id;
    let mut window_end = origin_segment_id + 1;
    let mut cardinality_ub: u64 = origin.cardinality() as u64;
    let capacity_target = capacity_target(leaf.num_segments(), calibrator_tree_height);

    loop {
        let window_len = window_end - window_start;
        if window_len >= capacity_target.max(1) {
            break;
        }

        let pressure_left = pressure(leaf, window_start.checked_sub(1));
        let pressure_right = pressure(leaf, Some(window_end).filter(|&e| (e as usize) < leaf.num_segments()));

        match (pressure_left, pressure_right) {
            (None, None) => break,
            (Some(_), None) => {
                window_start -= 1;
                acquire(leaf, window_start)?;
                cardinality_ub += leaf.segment(window_start).map_or(0, |s| s.cardinality() as u64);
            }
            (None, Some(_)) => {
                acquire(leaf, window_end)?;
                cardinality_ub += leaf.segment(window_end).map_or(0, |s| s.cardinality() as u64);
                window_end += 1;
            }
            (Some(l), Some(r)) => {
                if l >= r {
                    window_start -= 1;
                    acquire(leaf, window_start)?;
                    cardinality_ub += leaf.segment(window_start).map_or(0, |s| s.cardinality() as u64);
                } else {
                    acquire(leaf, window_end)?;
                    cardinality_ub += leaf.segment(window_end).map_or(0, |s| s.cardinality() as u64);
                    window_end += 1;
                }
            }
        }
    }

    let window_len = window_end - window_start;
    let reached_both_ends = window_start == 0 && window_end as usize == leaf.num_segments();
    let mode = if reached_both_ends && window_len < capacity_target.max(1) {
        Mode::Split
    } else {
        Mode::Spread
    };

    Ok(Plan {
        first_leaf: Arc::clone(leaf),
        last_leaf: Arc::clone(leaf),
        window_start,
        window_end,
        num_output_segments: u32::from(window_len),
        mode,
        cardinality_ub,
    })
}

fn pressure(leaf: &Arc<Leaf>, segment_id: Option<u16>) -> Option<f64> {
    let segment_id = segment_id?;
    let segment = leaf.segment(segment_id)?;
    Some(f64::from(segment.used_space()))
}

fn acquire(leaf: &Arc<Leaf>, segment_id: u16) -> Result<()> {
    let segment = leaf
        .segment(segment_id)
        .ok_or_else(|| Error::Internal("crawler window out of range".into()))?;
    segment.latch().rebalancer_enter();
    Ok(())
}

/// Releases every segment in `[plan.window_start, plan.window_end)` of the
/// plan's first leaf back to `FREE`, publishing a new version.
pub fn release_window(plan: &Plan) {
    for id in plan.window_start..plan.window_end {
        if let Some(segment) = plan.first_leaf.segment(id) {
            segment.latch().rebalancer_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn zero_height_defaults_to_half_the_leaf() {
        assert_eq!(capacity_target(512, 0), 256);
        assert_eq!(capacity_target(16, 0), 8);
    }

    #[test]
    fn explicit_height_targets_a_power_of_two_clamped_to_the_leaf() {
        assert_eq!(capacity_target(512, 3), 8);
        assert_eq!(capacity_target(4, 10), 4, "target must never exceed the leaf's own size");
    }

    #[test]
    fn single_segment_leaf_never_yields_a_zero_target() {
        assert_eq!(capacity_target(1, 0), 1);
    }
}
