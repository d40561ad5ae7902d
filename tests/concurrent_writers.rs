use std::collections::BTreeSet;
use std::thread;

use teseo::Config;
use test_log::test;

/// Two threads concurrently grow the same hub vertex's edge list with
/// disjoint destinations (one odd, one even). Once both commit, every edge
/// from either writer must be present and none duplicated or lost — the
/// segment latch and rebalancer must serialize the two writers correctly
/// rather than let one clobber the other's undo chain or fence keys.
#[test]
fn disjoint_concurrent_edge_inserts_are_all_preserved() {
    let engine = Config::new().memstore_segment_size(32).open();
    let ctx = engine.register_thread();

    let setup = engine.start_transaction(&ctx, false);
    setup.insert_vertex(10).unwrap();
    for dst in 20..120 {
        setup.insert_vertex(dst).unwrap();
    }
    setup.commit().unwrap();
    engine.unregister_thread(ctx);

    let odd_engine = engine.clone();
    let even_engine = engine.clone();

    let odd_writer = thread::spawn(move || {
        let ctx = odd_engine.register_thread();
        let txn = odd_engine.start_transaction(&ctx, false);
        for dst in (21..120).step_by(2) {
            txn.insert_edge(10, dst, f64::from(dst)).unwrap();
        }
        txn.commit().unwrap();
        odd_engine.unregister_thread(ctx);
    });

    let even_writer = thread::spawn(move || {
        let ctx = even_engine.register_thread();
        let txn = even_engine.start_transaction(&ctx, false);
        for dst in (20..120).step_by(2) {
            txn.insert_edge(10, dst, f64::from(dst)).unwrap();
        }
        txn.commit().unwrap();
        even_engine.unregister_thread(ctx);
    });

    odd_writer.join().unwrap();
    even_writer.join().unwrap();

    let ctx = engine.register_thread();
    let reader = engine.start_transaction(&ctx, true);

    assert_eq!(reader.degree(10, false).unwrap(), 100);

    let mut seen = BTreeSet::new();
    reader
        .edges(10, |dst, weight| {
            assert_eq!(weight, f64::from(dst));
            seen.insert(dst);
            true
        })
        .unwrap();
    assert_eq!(seen, (20..120).collect::<BTreeSet<_>>());

    reader.commit().unwrap();
    engine.unregister_thread(ctx);
}
