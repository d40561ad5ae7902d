use teseo::Config;
use test_log::test;

#[test]
fn explicit_rollback_undoes_its_writes() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let txn = engine.start_transaction(&ctx, false);
    txn.insert_vertex(5).unwrap();
    assert!(txn.has_vertex(5));
    txn.rollback().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert!(!reader.has_vertex(5));
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}

#[test]
fn dropping_an_unfinished_transaction_rolls_it_back() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    {
        let txn = engine.start_transaction(&ctx, false);
        txn.insert_vertex(42).unwrap();
        txn.insert_vertex(43).unwrap();
        txn.insert_edge(42, 43, 1.0).unwrap();
        // txn is dropped here without commit() or rollback().
    }

    let reader = engine.start_transaction(&ctx, true);
    assert!(!reader.has_vertex(42));
    assert!(!reader.has_vertex(43));
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}

#[test]
fn rollback_restores_a_removed_vertex() {
    let engine = Config::new().open();
    let ctx = engine.register_thread();

    let setup = engine.start_transaction(&ctx, false);
    setup.insert_vertex(1).unwrap();
    setup.commit().unwrap();

    let txn = engine.start_transaction(&ctx, false);
    txn.remove_vertex(1).unwrap();
    assert!(!txn.has_vertex(1));
    txn.rollback().unwrap();

    let reader = engine.start_transaction(&ctx, true);
    assert!(reader.has_vertex(1));
    reader.commit().unwrap();

    engine.unregister_thread(ctx);
}
