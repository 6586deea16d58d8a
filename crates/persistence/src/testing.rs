//! Shared persistence-behavior test suite, run against both
//! `persistence-memory` and `persistence-postgres` so the same properties
//! hold for every backend.

use serde_json::json;

use crate::{
    ConflictStrategy,
    Persistence,
};

pub async fn run_persistence_test_suite(p: &dyn Persistence) {
    put_then_get(p).await;
    overwrite_conflict_strategy(p).await;
    error_conflict_strategy_rejects_duplicate(p).await;
    scan_prefix_is_ordered(p).await;
    delete_prefix_removes_matching_rows(p).await;
    rolled_back_transaction_is_invisible(p).await;
    read_only_mode_blocks_writes(p).await;
}

async fn put_then_get(p: &dyn Persistence) {
    let mut tx = p.begin().await.unwrap();
    tx.put("t1", "k1".to_string(), json!({"v": 1})).await.unwrap();
    p.commit(tx).await.unwrap();

    let mut tx = p.begin().await.unwrap();
    let value = tx.get("t1", "k1").await.unwrap();
    assert_eq!(value, Some(json!({"v": 1})));
    p.commit(tx).await.unwrap();
}

async fn overwrite_conflict_strategy(p: &dyn Persistence) {
    let outcome = p
        .bulk_insert("t2", vec![("k".to_string(), json!(1))], ConflictStrategy::Overwrite, 100)
        .await
        .unwrap();
    assert_eq!(outcome.rows_written, 1);
    let outcome = p
        .bulk_insert("t2", vec![("k".to_string(), json!(2))], ConflictStrategy::Overwrite, 100)
        .await
        .unwrap();
    assert_eq!(outcome.rows_written, 1);

    let mut tx = p.begin().await.unwrap();
    assert_eq!(tx.get("t2", "k").await.unwrap(), Some(json!(2)));
    p.commit(tx).await.unwrap();
}

async fn error_conflict_strategy_rejects_duplicate(p: &dyn Persistence) {
    p.bulk_insert("t3", vec![("k".to_string(), json!(1))], ConflictStrategy::Error, 100).await.unwrap();
    let result = p.bulk_insert("t3", vec![("k".to_string(), json!(2))], ConflictStrategy::Error, 100).await;
    assert!(result.is_err());
}

async fn scan_prefix_is_ordered(p: &dyn Persistence) {
    let mut tx = p.begin().await.unwrap();
    for k in ["a", "b", "c"] {
        tx.put("t4", format!("prefix/{k}"), json!(k)).await.unwrap();
    }
    tx.put("t4", "other/x".to_string(), json!("x")).await.unwrap();
    p.commit(tx).await.unwrap();

    let mut tx = p.begin().await.unwrap();
    let rows = tx.scan_prefix("t4", "prefix/").await.unwrap();
    p.commit(tx).await.unwrap();
    let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(keys.len(), 3);
}

async fn delete_prefix_removes_matching_rows(p: &dyn Persistence) {
    let mut tx = p.begin().await.unwrap();
    for k in ["a", "b"] {
        tx.put("t5", format!("del/{k}"), json!(k)).await.unwrap();
    }
    tx.put("t5", "keep/x".to_string(), json!("x")).await.unwrap();
    p.commit(tx).await.unwrap();

    let mut tx = p.begin().await.unwrap();
    let deleted = tx.delete_prefix("t5", "del/").await.unwrap();
    p.commit(tx).await.unwrap();
    assert_eq!(deleted, 2);

    let mut tx = p.begin().await.unwrap();
    let remaining = tx.scan_prefix("t5", "").await.unwrap();
    p.commit(tx).await.unwrap();
    assert_eq!(remaining.len(), 1);
}

async fn rolled_back_transaction_is_invisible(p: &dyn Persistence) {
    let mut tx = p.begin().await.unwrap();
    tx.put("t6", "ghost".to_string(), json!(1)).await.unwrap();
    drop(tx); // rolled back, never committed

    let mut tx = p.begin().await.unwrap();
    let value = tx.get("t6", "ghost").await.unwrap();
    p.commit(tx).await.unwrap();
    assert_eq!(value, None);
}

async fn read_only_mode_blocks_writes(p: &dyn Persistence) {
    p.set_read_only(true).await.unwrap();
    assert!(p.is_read_only());
    let result = p.write_only("t7", "k".to_string(), json!(1)).await;
    assert!(result.is_err());
    p.set_read_only(false).await.unwrap();
    assert!(!p.is_read_only());
    p.write_only("t7", "k".to_string(), json!(1)).await.unwrap();
}
