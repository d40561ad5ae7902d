// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Merges per-range [`PartialResult`]s into a dense degree vector, then
//! builds a `vertex_id -> logical_id` lookup atop it (§4.10).

use super::partial_result::PartialResult;
use super::view::{AuxView, HashBackedLookup};
use crate::config::Config;

/// A `(vertex_id, total_degree)` pair, indexed by its position: that
/// position is the vertex's `logical_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DegreeEntry {
    pub vertex_id: u64,
    pub degree: u64,
}

/// Ratio of `max_vertex_id / num_vertices` below which a direct-address
/// table beats an open-addressing hash for `vertex_id -> logical_id`.
const DIRECT_ADDRESS_DENSITY_THRESHOLD: u64 = 4;

/// Merges partial results, issued in range order, into a dense degree
/// vector. Adjacent partials sharing a boundary vertex are joined by
/// summing their degree contributions for that vertex.
#[must_use]
pub fn merge_partial_results(partials: Vec<PartialResult>) -> Vec<DegreeEntry> {
    let mut degree_vector: Vec<DegreeEntry> = Vec::new();

    for partial in partials {
        for entry in partial.into_entries() {
            match degree_vector.last_mut() {
                Some(last) if last.vertex_id == entry.vertex_id => last.degree += entry.degree,
                _ => degree_vector.push(DegreeEntry {
                    vertex_id: entry.vertex_id,
                    degree: entry.degree,
                }),
            }
        }
    }

    degree_vector
}

/// Builds a static (read-only) aux view from a merged degree vector.
#[must_use]
pub fn build_static_view(degree_vector: Vec<DegreeEntry>, config: &Config) -> AuxView {
    let num_vertices = degree_vector.len() as u64;
    let max_vertex_id = degree_vector.iter().map(|e| e.vertex_id).max().unwrap_or(0);

    let lookup = if num_vertices == 0 || max_vertex_id / num_vertices.max(1) < DIRECT_ADDRESS_DENSITY_THRESHOLD {
        HashBackedLookup::direct(&degree_vector, max_vertex_id)
    } else {
        HashBackedLookup::hashed(&degree_vector, config)
    };

    AuxView::Static {
        degree_vector,
        lookup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn merges_boundary_vertex_split_across_partials() {
        let mut left = PartialResult::new();
        left.observe_vertex(10);
        left.observe_edge(10);

        let mut right = PartialResult::new();
        right.observe_edge(10);
        right.observe_vertex(20);

        let merged = merge_partial_results(vec![left, right]);
        assert_eq!(
            merged,
            vec![
                DegreeEntry { vertex_id: 10, degree: 2 },
                DegreeEntry { vertex_id: 20, degree: 0 },
            ]
        );
    }

    #[test]
    fn builds_direct_address_view_for_dense_ids() {
        let degree_vector = vec![
            DegreeEntry { vertex_id: 1, degree: 0 },
            DegreeEntry { vertex_id: 2, degree: 1 },
            DegreeEntry { vertex_id: 3, degree: 0 },
        ];
        let view = build_static_view(degree_vector, &Config::default());
        assert_eq!(view.logical_id(2), Some(1));
        assert_eq!(view.vertex_id(1), Some(2));
    }
}
