use teseo::Config;
use test_log::test;

#[test]
fn earlier_snapshot_does_not_see_a_write_committed_after_it_started() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let setup = engine.start_transaction(&ctx, false);
    setup.insert_vertex(1).unwrap();
    setup.commit().unwrap();

    let early_reader = engine.start_transaction(&ctx, true);

    let writer = engine.start_transaction(&ctx, false);
    writer.insert_vertex(2).unwrap();
    writer.commit().unwrap();

    let late_reader = engine.start_transaction(&ctx, true);

    assert!(early_reader.has_vertex(1));
    assert!(!early_reader.has_vertex(2), "snapshot started before the write must not observe it");

    assert!(late_reader.has_vertex(1));
    assert!(late_reader.has_vertex(2), "snapshot started after the commit must observe it");

    early_reader.commit().unwrap();
    late_reader.commit().unwrap();
    engine.unregister_thread(ctx);
}

#[test]
fn a_transaction_sees_its_own_uncommitted_writes() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(9).unwrap();
    assert!(txn.has_vertex(9), "the writer must see its own not-yet-committed insert");

    let other_reader = engine.start_transaction(&ctx, true);
    assert!(!other_reader.has_vertex(9), "other snapshots must not see an uncommitted write");
    other_reader.commit().unwrap();

    txn.commit().unwrap();
    engine.unregister_thread(ctx);
}

#[test]
fn aux_view_snapshot_for_a_read_only_transaction_does_not_change_underneath_it() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let setup = engine.start_transaction(&ctx, false);
    setup.insert_vertex(1).unwrap();
    setup.insert_vertex(2).unwrap();
    setup.commit().unwrap();

    let stable_reader = engine.start_transaction(&ctx, true);
    let seen_before = stable_reader.num_vertices();

    let writer = engine.start_transaction(&ctx, false);
    writer.insert_vertex(3).unwrap();
    writer.commit().unwrap();

    assert_eq!(
        stable_reader.num_vertices(),
        seen_before,
        "a concurrently committed write must not change counts already observed by a running transaction"
    );

    let fresh_reader = engine.start_transaction(&ctx, true);
    assert_eq!(fresh_reader.num_vertices(), seen_before + 1);

    stable_reader.commit().unwrap();
    fresh_reader.commit().unwrap();
    engine.unregister_thread(ctx);
}
