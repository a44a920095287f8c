//! Incremental update cycles: dedup and normalization against local rows

use ledger::ImportType;
use replica_core::Operation;
use replica_sink::ChangeSummary;
use replica_sync::testing::fixtures::{self, vejnavn, ENTITY};
use replica_sync::CycleOutcome;
use tokio_test::assert_ok;

use crate::helpers::{applied_changes, events, initialized, local_txid};

#[tokio::test]
async fn test_empty_cycle_advances_watermark_without_changes() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    let table = fixtures::vejnavn_table();
    let rows_before = store.rows(&table);

    source.set_last_txid(8);
    let report = client.update_entity(ENTITY).await.unwrap();

    match report.outcome {
        CycleOutcome::Applied {
            source_txid,
            rows_loaded,
            changes,
            ..
        } => {
            assert_eq!(source_txid, 8);
            assert_eq!(rows_loaded, 0);
            assert!(changes.is_empty());
        }
        other => panic!("expected applied cycle, got {other:?}"),
    }
    assert_eq!(store.rows(&table), rows_before);
    assert!(store.changes(&table).is_empty());
    assert_eq!(store.watermark(ENTITY), Some(8));

    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].import_type, ImportType::Event);
}

#[tokio::test]
async fn test_update_of_absent_row_becomes_insert() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    events(&source, &[(6, Operation::Update, 3, "Cirkelvej")]);
    source.set_last_txid(6);

    let report = client.update_entity(ENTITY).await.unwrap();
    assert_eq!(
        applied_changes(&report),
        ChangeSummary {
            inserted: 1,
            updated: 0,
            deleted: 0
        }
    );

    let table = fixtures::vejnavn_table();
    assert_eq!(
        store.rows(&table),
        vec![vejnavn(1, "Algade"), vejnavn(3, "Cirkelvej")]
    );
    let logged = store.changes(&table);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].operation, Operation::Insert);
    assert_eq!(logged[0].local_txid, local_txid(&report));
}

#[tokio::test]
async fn test_insert_of_existing_row_becomes_update() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    events(
        &source,
        &[
            (6, Operation::Insert, 1, "Algade Nord"),
            (6, Operation::Insert, 2, "Bredgade"),
        ],
    );
    source.set_last_txid(6);

    let report = client.update_entity(ENTITY).await.unwrap();
    // Row 2 is rewritten to an update but already holds these values.
    assert_eq!(
        applied_changes(&report),
        ChangeSummary {
            inserted: 0,
            updated: 1,
            deleted: 0
        }
    );

    let table = fixtures::vejnavn_table();
    assert_eq!(
        store.rows(&table),
        vec![vejnavn(1, "Algade Nord"), vejnavn(2, "Bredgade")]
    );
    assert!(store
        .changes(&table)
        .iter()
        .all(|c| c.operation == Operation::Update));
}

#[tokio::test]
async fn test_delete_of_absent_row_is_a_no_op() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    events(&source, &[(6, Operation::Delete, 9, "Nowhere")]);
    source.set_last_txid(6);

    let report = client.update_entity(ENTITY).await.unwrap();
    assert!(applied_changes(&report).is_empty());

    let table = fixtures::vejnavn_table();
    assert_eq!(store.rows(&table), vec![vejnavn(1, "Algade")]);
    assert!(store.changes(&table).is_empty());
    assert_eq!(store.watermark(ENTITY), Some(6));
}

#[tokio::test]
async fn test_delete_of_existing_row() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    events(&source, &[(6, Operation::Delete, 2, "Bredgade")]);
    source.set_last_txid(6);

    let report = client.update_entity(ENTITY).await.unwrap();
    assert_eq!(applied_changes(&report).deleted, 1);
    assert_eq!(
        store.rows(&fixtures::vejnavn_table()),
        vec![vejnavn(1, "Algade")]
    );
}

#[tokio::test]
async fn test_last_write_wins_within_a_cycle() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    events(
        &source,
        &[
            (6, Operation::Update, 1, "first"),
            (7, Operation::Update, 1, "second"),
            (8, Operation::Insert, 2, "Bredgade"),
            (9, Operation::Delete, 2, "Bredgade"),
        ],
    );
    source.set_last_txid(9);

    let report = client.update_entity(ENTITY).await.unwrap();
    let table = fixtures::vejnavn_table();
    assert_eq!(store.rows(&table), vec![vejnavn(1, "second")]);

    let logged = store.changes(&table);
    assert_eq!(logged.len(), 1, "one change per row key survives: {logged:?}");
    assert_eq!(logged[0].row, vejnavn(1, "second"));
    assert_eq!(
        applied_changes(&report),
        ChangeSummary {
            inserted: 0,
            updated: 1,
            deleted: 0
        }
    );
}

#[tokio::test]
async fn test_equal_txids_keep_the_later_event() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    events(
        &source,
        &[
            (6, Operation::Update, 1, "earlier"),
            (6, Operation::Update, 1, "later"),
        ],
    );
    source.set_last_txid(6);

    assert_ok!(client.update_entity(ENTITY).await);
    assert_eq!(
        store.rows(&fixtures::vejnavn_table()),
        vec![vejnavn(1, "later")]
    );
}

#[tokio::test]
async fn test_replayed_events_are_idempotent() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    events(
        &source,
        &[
            (6, Operation::Insert, 2, "Bredgade"),
            (7, Operation::Update, 1, "Algade Syd"),
        ],
    );
    source.set_last_txid(7);
    assert_ok!(client.update_entity(ENTITY).await);
    let table = fixtures::vejnavn_table();
    let after_first = store.rows(&table);

    // The same logical changes arrive again under new txids.
    events(
        &source,
        &[
            (8, Operation::Insert, 2, "Bredgade"),
            (9, Operation::Update, 1, "Algade Syd"),
        ],
    );
    source.set_last_txid(9);
    let report = client.update_entity(ENTITY).await.unwrap();

    assert!(applied_changes(&report).is_empty());
    assert_eq!(store.rows(&table), after_first);
}

#[tokio::test]
async fn test_empty_string_loads_as_null() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    events(&source, &[(6, Operation::Update, 1, "")]);
    source.set_last_txid(6);

    assert_ok!(client.update_entity(ENTITY).await);
    assert_eq!(
        store.rows(&fixtures::vejnavn_table()),
        vec![vec![Some("1".to_string()), None]]
    );
}
