//! A cycle failing part way leaves no trace and can be rerun as is

use ledger::EntityState;
use replica_core::Operation;
use replica_sync::testing::fixtures::{self, vejnavn, ENTITY};
use replica_sync::testing::{MemoryStore, SourceRequest, StaticSource};
use replica_sync::ReplicationError;

use crate::helpers::{client, events, initialized};

#[tokio::test]
async fn test_update_failing_after_k_rows_rolls_back() {
    let (source, store, client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    let mut client = client.with_batch_size(1);
    let table = fixtures::vejnavn_table();
    let rows_before = store.rows(&table);
    let entries_before = store.ledger_entries();

    events(
        &source,
        &(0..10)
            .map(|i| (6 + i, Operation::Insert, 10 + i, "Ny vej"))
            .collect::<Vec<_>>(),
    );
    source.set_last_txid(15);
    source.fail_after(Some(5));

    let loaded_before = store.loaded_rows();
    let err = client.update_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Transport(_)), "{err}");
    assert!(err.is_retryable());

    let staged = store.loaded_rows() - loaded_before;
    assert!(staged > 0 && staged <= 5, "staged {staged} rows before failing");
    assert_eq!(store.rows(&table), rows_before);
    assert!(store.changes(&table).is_empty());
    assert_eq!(store.ledger_entries(), entries_before);
    assert_eq!(store.watermark(ENTITY), Some(5));

    // The rerun asks for exactly the same window and succeeds.
    source.fail_after(None);
    client.update_entity(ENTITY).await.unwrap();
    let windows: Vec<_> = source
        .requests()
        .into_iter()
        .filter(|r| matches!(r, SourceRequest::Events { .. }))
        .collect();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0], windows[1]);
    assert_eq!(store.rows(&table).len(), 12);
    assert_eq!(store.watermark(ENTITY), Some(15));
}

#[tokio::test]
async fn test_initialize_failure_leaves_entity_uninitialized() {
    let source = StaticSource::new(fixtures::datamodel());
    source.set_last_txid(3);
    source.set_snapshot(
        ENTITY,
        (1..=10).map(|id| fixtures::record(id, "Vej")).collect(),
    );
    source.fail_after(Some(4));
    let store = MemoryStore::new();
    let mut client = client(&source, &store).await.with_batch_size(2);

    let err = client.initialize_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Transport(_)));
    assert!(store.rows(&fixtures::vejnavn_table()).is_empty());
    assert!(store.ledger_entries().is_empty());
    assert_eq!(
        client.status(ENTITY).await.unwrap().state,
        EntityState::Uninitialized
    );

    source.fail_after(None);
    client.initialize_entity(ENTITY).await.unwrap();
    assert_eq!(store.rows(&fixtures::vejnavn_table()).len(), 10);
    assert_eq!(store.watermark(ENTITY), Some(3));
}

#[tokio::test]
async fn test_resync_failure_keeps_table_and_watermark() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    source.set_snapshot(
        ENTITY,
        vec![fixtures::record(1, "Algade"), fixtures::record(3, "Cirkelvej")],
    );
    source.set_last_txid(9);
    source.fail_after(Some(1));

    let err = client.resync_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Transport(_)));
    let table = fixtures::vejnavn_table();
    assert_eq!(
        store.rows(&table),
        vec![vejnavn(1, "Algade"), vejnavn(2, "Bredgade")]
    );
    assert_eq!(store.watermark(ENTITY), Some(5));
}

#[tokio::test]
async fn test_encoding_failure_rolls_back_and_is_not_retryable() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    let mut bad = fixtures::record(2, "Bredgade");
    bad.insert("id".to_string(), serde_json::json!("two"));
    source.push_events(
        ENTITY,
        vec![
            fixtures::event(6, Operation::Update, 1, "Algade Nord"),
            replica_core::ChangeEvent::new(7, Operation::Insert, bad),
        ],
    );
    source.set_last_txid(7);

    let err = client.update_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Encoding(_)), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(
        store.rows(&fixtures::vejnavn_table()),
        vec![vejnavn(1, "Algade")]
    );
    assert_eq!(store.watermark(ENTITY), Some(5));
}
