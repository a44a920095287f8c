//! Shared setup for replication cycle tests

use replica_core::Operation;
use replica_sync::testing::{fixtures, MemoryStore, StaticSource};
use replica_sync::{CycleOutcome, CycleReport, ReplicationClient};
use replica_sink::ChangeSummary;

pub type TestClient = ReplicationClient<StaticSource, MemoryStore>;

/// A client over clones of `source` and `store`, so the test keeps handles.
pub async fn client(source: &StaticSource, store: &MemoryStore) -> TestClient {
    ReplicationClient::connect(source.clone(), store.clone(), fixtures::config())
        .await
        .unwrap()
}

/// Source, store and client with `rows` loaded by an initialize at `txid`.
pub async fn initialized(
    txid: i64,
    rows: &[(i64, &str)],
) -> (StaticSource, MemoryStore, TestClient) {
    let source = StaticSource::new(fixtures::datamodel());
    source.set_last_txid(txid);
    source.set_snapshot(
        fixtures::ENTITY,
        rows.iter().map(|(id, navn)| fixtures::record(*id, navn)).collect(),
    );
    let store = MemoryStore::new();
    let mut client = client(&source, &store).await;
    client.initialize_entity(fixtures::ENTITY).await.unwrap();
    (source, store, client)
}

pub fn events(source: &StaticSource, events: &[(i64, Operation, i64, &str)]) {
    source.push_events(
        fixtures::ENTITY,
        events
            .iter()
            .map(|(txid, op, id, navn)| fixtures::event(*txid, *op, *id, navn))
            .collect(),
    );
}

pub fn applied_changes(report: &CycleReport) -> ChangeSummary {
    match &report.outcome {
        CycleOutcome::Applied { changes, .. } => *changes,
        other => panic!("expected an applied cycle, got {other:?}"),
    }
}

pub fn local_txid(report: &CycleReport) -> i64 {
    match &report.outcome {
        CycleOutcome::Applied { local_txid, .. } => *local_txid,
        other => panic!("expected an applied cycle, got {other:?}"),
    }
}
