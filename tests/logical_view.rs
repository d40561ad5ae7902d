use teseo::{Config, Error, LogicalError};
use test_log::test;

#[test]
fn empty_engine_has_no_vertices_and_rejects_every_lookup() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let reader = engine.start_transaction(&ctx, true);
    assert_eq!(reader.num_vertices(), 0);
    assert_eq!(reader.num_edges(), 0);
    assert!(matches!(reader.logical_id(1), Err(Error::Logical(LogicalError::VertexDoesNotExist))));
    assert!(matches!(reader.vertex_id(0), Err(Error::Logical(LogicalError::InvalidLogicalVertexId))));
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}

#[test]
fn logical_id_and_vertex_id_round_trip() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    for id in [40_u64, 10, 30, 20] {
        txn.insert_vertex(id).unwrap();
    }
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert_eq!(reader.num_vertices(), 4);

    for i in 0..reader.num_vertices() {
        let vertex_id = reader.vertex_id(i).unwrap();
        assert_eq!(reader.logical_id(vertex_id).unwrap(), i);
        assert_eq!(reader.degree(vertex_id, false).unwrap(), reader.degree(i, true).unwrap());
    }

    reader.commit().unwrap();
    engine.unregister_thread(ctx);
}

#[test]
fn logical_id_tracks_sorted_vertex_order() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(40).unwrap();
    txn.insert_vertex(10).unwrap();
    txn.insert_vertex(30).unwrap();
    txn.commit().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert_eq!(reader.logical_id(10).unwrap(), 0);
    assert_eq!(reader.logical_id(30).unwrap(), 1);
    assert_eq!(reader.logical_id(40).unwrap(), 2);
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}
