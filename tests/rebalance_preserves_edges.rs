use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use teseo::Config;
use test_log::test;

/// A tiny segment size forces the hub vertex's edge list to overflow its
/// first segment many times over, driving the crawler/spread pipeline
/// through several rebalances over the course of a single transaction.
fn tiny_engine() -> teseo::Teseo {
    Config::new().memstore_segment_size(16).open()
}

#[test]
fn hub_vertex_keeps_every_edge_across_repeated_rebalances() {
    let engine = tiny_engine();
    let ctx = engine.register_thread();

    // Insertion order shouldn't matter to the rebalancer's correctness, so
    // the edges are inserted in a randomized order rather than ascending.
    let mut destinations: Vec<u64> = (20..=300).collect();
    destinations.shuffle(&mut rand::rng());

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(10).unwrap();
    for &dst in &destinations {
        txn.insert_vertex(dst).unwrap();
    }
    for &dst in &destinations {
        txn.insert_edge(10, dst, f64::from(dst)).unwrap();
    }
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert_eq!(reader.degree(10, false).unwrap(), 281);

    let mut seen = BTreeSet::new();
    reader
        .edges(10, |dst, weight| {
            assert!((20..=300).contains(&dst), "unexpected destination {dst}");
            assert_eq!(weight, f64::from(dst), "rebalance must not corrupt edge payloads");
            seen.insert(dst);
            true
        })
        .unwrap();
    assert_eq!(seen.len(), 281, "rebalance must not lose or duplicate any edge");

    for dst in 20..=300 {
        assert_eq!(reader.degree(dst, false).unwrap(), 0);
    }

    reader.commit().unwrap();
    engine.unregister_thread(ctx);
}

#[test]
fn disjoint_vertices_remain_correctly_ordered_after_rebalance() {
    let engine = tiny_engine();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    for id in [10_u64, 20, 30, 40] {
        txn.insert_vertex(id).unwrap();
    }
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    for id in [10_u64, 20, 30, 40] {
        assert!(reader.has_vertex(id));
        assert_eq!(reader.degree(id, false).unwrap(), 0);
    }
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}
