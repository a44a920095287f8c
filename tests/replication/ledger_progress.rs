//! Ledger watermark progression and per-mode state requirements

use ledger::{EntityState, ImportType};
use replica_core::Operation;
use replica_sync::testing::fixtures::{self, vejnavn, ENTITY};
use replica_sync::testing::{MemoryStore, SourceRequest, StaticSource};
use replica_sync::{CycleOutcome, Mode, ReplicationError};

use crate::helpers::{client, events, initialized, local_txid};

fn last_event_window(source: &StaticSource) -> Option<(i64, i64)> {
    source.requests().into_iter().rev().find_map(|r| match r {
        SourceRequest::Events {
            from_txid, to_txid, ..
        } => Some((from_txid, to_txid)),
        _ => None,
    })
}

#[tokio::test]
async fn test_watermark_is_monotonic_and_next_window_starts_after_it() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade")]).await;
    let mut previous = store.watermark(ENTITY).unwrap();
    let mut previous_local = store.ledger_entries()[0].local_txid;

    for (step, remote_txid) in [7, 7, 12, 12, 20].into_iter().enumerate() {
        let navn = format!("Algade {step}");
        events(&source, &[(remote_txid, Operation::Update, 1, navn.as_str())]);
        source.set_last_txid(remote_txid);
        let requests_before = source.requests().len();

        let report = client.update_entity(ENTITY).await.unwrap();
        let watermark = store.watermark(ENTITY).unwrap();
        assert!(watermark >= previous);

        match report.outcome {
            CycleOutcome::Applied { source_txid, .. } => {
                assert_eq!(source_txid, remote_txid);
                assert_eq!(last_event_window(&source), Some((previous + 1, remote_txid)));
                assert!(local_txid(&report) > previous_local);
                previous_local = local_txid(&report);
            }
            CycleOutcome::UpToDate { watermark: w } => {
                assert_eq!(w, previous);
                assert_eq!(source.requests().len(), requests_before, "nothing fetched");
            }
        }
        previous = watermark;
    }

    assert_eq!(previous, 20);
    // 1 download + 3 applied updates; the two up-to-date runs record nothing.
    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 4);
    assert!(entries[1..].iter().all(|e| e.import_type == ImportType::Event));
    assert_eq!(
        store.rows(&fixtures::vejnavn_table()),
        vec![vejnavn(1, "Algade 4")]
    );
}

#[tokio::test]
async fn test_resync_moves_watermark_for_following_update() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    source.set_snapshot(
        ENTITY,
        vec![
            fixtures::record(1, "Algade"),
            fixtures::record(2, "Bredgade Nord"),
            fixtures::record(3, "Cirkelvej"),
        ],
    );
    source.set_last_txid(25);

    let report = client.resync_entity(ENTITY).await.unwrap();
    match &report.outcome {
        CycleOutcome::Applied {
            source_txid,
            rows_loaded,
            changes,
            ..
        } => {
            assert_eq!(*source_txid, 25);
            assert_eq!(*rows_loaded, 3);
            assert_eq!((changes.inserted, changes.updated, changes.deleted), (1, 1, 0));
        }
        other => panic!("expected applied resync, got {other:?}"),
    }
    let last = store.ledger_entries().pop().unwrap();
    assert_eq!(last.import_type, ImportType::Download);
    assert_eq!(last.source_txid, 25);
    assert!(source.requests().contains(&SourceRequest::Download {
        entity: ENTITY.to_string(),
        txid: Some(25),
    }));

    source.set_last_txid(27);
    client.update_entity(ENTITY).await.unwrap();
    assert_eq!(last_event_window(&source), Some((26, 27)));
}

#[tokio::test]
async fn test_resync_refuses_snapshot_behind_watermark() {
    let (source, store, mut client) = initialized(5, &[(1, "Algade"), (2, "Bredgade")]).await;
    events(&source, &[(7, Operation::Update, 1, "Algade Nord")]);
    source.set_last_txid(9);
    client.update_entity(ENTITY).await.unwrap();

    let table = fixtures::vejnavn_table();
    let rows_before = store.rows(&table);
    let changes_before = store.changes(&table);
    let entries_before = store.ledger_entries();
    let requests_before = source.requests().len();

    // The remote answers with an older txid than the ledger holds.
    source.set_last_txid(3);
    source.set_snapshot(ENTITY, vec![fixtures::record(1, "Algade")]);
    let err = client.resync_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::Reconciliation(_)), "{err}");
    assert!(err.to_string().contains("behind ledger watermark 9"), "{err}");

    assert_eq!(source.requests().len(), requests_before, "no snapshot fetched");
    assert_eq!(store.rows(&table), rows_before);
    assert_eq!(store.changes(&table), changes_before);
    assert_eq!(store.ledger_entries(), entries_before);
    assert_eq!(store.watermark(ENTITY), Some(9));

    // A snapshot at the watermark itself is accepted.
    source.set_last_txid(9);
    let report = client.resync_entity(ENTITY).await.unwrap();
    assert!(matches!(report.outcome, CycleOutcome::Applied { source_txid: 9, .. }));
    assert_eq!(store.rows(&table), vec![vejnavn(1, "Algade")]);
}

#[tokio::test]
async fn test_resync_deletes_rows_missing_from_snapshot() {
    let (source, store, mut client) =
        initialized(5, &[(1, "Algade"), (2, "Bredgade"), (3, "Cirkelvej")]).await;
    source.set_snapshot(ENTITY, vec![fixtures::record(2, "Bredgade")]);
    source.set_last_txid(6);

    let report = client.resync_entity(ENTITY).await.unwrap();
    match report.outcome {
        CycleOutcome::Applied { changes, .. } => assert_eq!(changes.deleted, 2),
        other => panic!("expected applied resync, got {other:?}"),
    }
    assert_eq!(
        store.rows(&fixtures::vejnavn_table()),
        vec![vejnavn(2, "Bredgade")]
    );
}

#[tokio::test]
async fn test_mode_requires_matching_state() {
    let source = StaticSource::new(fixtures::datamodel());
    source.set_last_txid(3);
    let store = MemoryStore::new();
    let mut client = client(&source, &store).await;

    let err = client.update_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::NotInitialized { .. }));
    let err = client.resync_entity(ENTITY).await.unwrap_err();
    assert!(matches!(err, ReplicationError::NotInitialized { .. }));
    assert!(source.requests().is_empty());

    client.initialize_entity(ENTITY).await.unwrap();
    let err = client.initialize_entity(ENTITY).await.unwrap_err();
    assert!(matches!(
        err,
        ReplicationError::AlreadyInitialized { txid: 3, .. }
    ));
    assert_eq!(store.ledger_entries().len(), 1);

    let status = client.status(ENTITY).await.unwrap();
    assert!(matches!(status.state, EntityState::Initialized { ref last } if last.source_txid == 3));
    assert_eq!(status.rows, 0);
}

#[tokio::test]
async fn test_run_processes_selected_entities_in_order() {
    let source = StaticSource::new(fixtures::datamodel());
    source.set_last_txid(4);
    source.set_snapshot(ENTITY, vec![fixtures::record(1, "Algade")]);
    let store = MemoryStore::new();
    let mut client = client(&source, &store).await;

    let entities = client.select(&[]).unwrap();
    assert_eq!(entities, vec![ENTITY.to_string()]);
    let reports = client.run(Mode::Initialize, &entities).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].mode, Mode::Initialize);

    let err = client.select(&["Bygning".to_string()]).unwrap_err();
    assert!(err.to_string().contains("Bygning"));
}

#[tokio::test]
async fn test_connect_rejects_config_not_matching_datamodel() {
    let mut model = fixtures::datamodel();
    model.clear();
    let source = StaticSource::new(model);
    let result = replica_sync::ReplicationClient::connect(
        source,
        MemoryStore::new(),
        fixtures::config(),
    )
    .await;
    assert!(matches!(result, Err(ReplicationError::Configuration(_))));
}
