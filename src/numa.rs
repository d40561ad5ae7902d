// Copyright (c) 2024-present, the Teseo authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! NUMA topology, consumed as a primitive (spec.md §1 non-goals): this
//! crate does not allocate memory on specific nodes, it only decides how
//! many replicas to keep and which one a given thread should prefer.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Config;

/// A trivial round-robin topology: `num_nodes` logical nodes, with threads
/// assigned one at registration time.
pub struct NumaTopology {
    num_nodes: u32,
    next_assignment: AtomicUsize,
}

impl NumaTopology {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_nodes: if config.numa_enabled { config.numa_num_nodes } else { 1 },
            next_assignment: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    /// Assigns the next NUMA node to a newly registered thread, round-robin.
    #[must_use]
    pub fn assign(&self) -> u64 {
        let next = self.next_assignment.fetch_add(1, Ordering::AcqRel);
        (next % self.num_nodes.max(1) as usize) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn single_node_topology_assigns_zero() {
        let topology = NumaTopology::from_config(&Config::default());
        assert_eq!(topology.assign(), 0);
        assert_eq!(topology.assign(), 0);
    }

    #[test]
    fn multi_node_topology_round_robins() {
        let topology = NumaTopology::from_config(&Config::new().numa_num_nodes(2));
        assert_eq!(topology.assign(), 0);
        assert_eq!(topology.assign(), 1);
        assert_eq!(topology.assign(), 0);
    }
}
