use teseo::Config;
use test_log::test;

#[test]
fn read_write_transaction_counts_reflect_a_concurrent_commit_immediately() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let setup = engine.start_transaction(&ctx, false);
    setup.insert_vertex(1).unwrap();
    setup.commit().unwrap();

    let writer = engine.start_transaction(&ctx, false);
    assert_eq!(writer.num_vertices(), 1);

    let other_writer = engine.start_transaction(&ctx, false);
    other_writer.insert_vertex(2).unwrap();
    other_writer.commit().unwrap();

    // A read-write transaction's aux reads go through the dynamic,
    // continuously-updated view, so it observes the concurrent commit
    // without waiting for a fresh keyspace rescan the way a read-only
    // transaction's cached static view would.
    assert_eq!(writer.num_vertices(), 2);

    writer.commit().unwrap();
    engine.unregister_thread(ctx);
}

#[test]
fn dynamic_view_tracks_this_transactions_own_inserts_and_edges() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(10).unwrap();
    txn.insert_vertex(20).unwrap();
    txn.insert_edge(10, 20, 1.5).unwrap();

    assert_eq!(txn.num_vertices(), 0, "the dynamic view only updates on commit, not inline");
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, false);
    assert_eq!(reader.num_vertices(), 2);
    assert_eq!(reader.num_edges(), 1);
    assert_eq!(reader.degree(10, false).unwrap(), 1);

    reader.commit().unwrap();
    engine.unregister_thread(ctx);
}

#[test]
fn rolled_back_vertex_never_reaches_the_dynamic_view() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(5).unwrap();
    txn.rollback().unwrap();

    let writer = engine.start_transaction(&ctx, false);
    assert_eq!(writer.num_vertices(), 0, "a rolled-back insert must not linger in the shared dynamic view");
    writer.commit().unwrap();

    engine.unregister_thread(ctx);
}

#[test]
fn read_only_transactions_keep_using_the_static_snapshot() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let setup = engine.start_transaction(&ctx, false);
    setup.insert_vertex(1).unwrap();
    setup.commit().unwrap();

    let stable_reader = engine.start_transaction(&ctx, true);
    let seen_before = stable_reader.num_vertices();

    let writer = engine.start_transaction(&ctx, false);
    writer.insert_vertex(2).unwrap();
    writer.commit().unwrap();

    assert_eq!(
        stable_reader.num_vertices(),
        seen_before,
        "a read-only transaction must still see a stable snapshot, unaffected by the dynamic view"
    );

    stable_reader.commit().unwrap();
    engine.unregister_thread(ctx);
}
