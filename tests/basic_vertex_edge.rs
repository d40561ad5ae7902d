use teseo::Config;
use test_log::test;

#[test]
fn insert_vertices_and_edge_then_read_back() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(10).unwrap();
    txn.insert_vertex(20).unwrap();
    txn.insert_edge(10, 20, 1020.0).unwrap();
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert_eq!(reader.degree(10, false).unwrap(), 1);
    assert!(reader.has_edge(10, 20));
    assert_eq!(reader.get_weight(10, 20).unwrap(), 1020.0);
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}

#[test]
fn vertex_with_no_edges_has_degree_zero() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(1).unwrap();
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert_eq!(reader.degree(1, false).unwrap(), 0);
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}

#[test]
fn vertex_table_tombstone_key_roundtrips() {
    // External id 0 maps to internal id 1, the value reserved elsewhere as a
    // vertex-table tombstone marker; it must still be addressable normally.
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(0).unwrap();
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert!(reader.has_vertex(0));
    assert_eq!(reader.degree(0, false).unwrap(), 0);
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}
