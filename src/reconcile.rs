//! Change reconciler.
//!
//! Turns the raw events staged for one cycle into a minimal changeset and
//! applies it:
//!
//! 1. dedup: per row key only the event with the highest txid survives and
//!    is logged to `<table>_changes` under the cycle's local txid
//! 2. normalize against the target table ([`NormalizationRule::ALL`], in order)
//! 3. apply the logged changes to the target table

use replica_core::TableModel;
use replica_sink::{ChangeSummary, NormalizationRule, ReplicaTransaction};
use tracing::{debug, info};

use crate::ReplicationError;

/// What reconciliation did with one cycle's staged events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Events staged by the copy pipeline
    pub staged: u64,
    /// Rows left after dedup and logged to the changes table
    pub logged: u64,
    /// Rows each normalization rule rewrote or dropped
    pub normalized: Vec<(NormalizationRule, u64)>,
    /// Changes applied to the target table
    pub applied: ChangeSummary,
}

/// Reconcile the staging table of `table` under `local_txid`.
///
/// With nothing staged the staging table is dropped and nothing else is
/// written; the caller still records the cycle in the ledger.
pub async fn reconcile_staged(
    tx: &mut (dyn ReplicaTransaction + '_),
    table: &TableModel,
    local_txid: i64,
) -> Result<ReconcileOutcome, ReplicationError> {
    let staged = tx.staged_count(table).await?;
    if staged == 0 {
        tx.drop_staging_table(table).await?;
        debug!("No staged events for {}", table.table);
        return Ok(ReconcileOutcome::default());
    }

    let logged = tx.promote_staged(table, local_txid).await?;
    tx.drop_staging_table(table).await?;
    debug!(
        "Deduplicated {} staged events for {} into {} changes",
        staged, table.table, logged
    );

    let mut normalized = Vec::with_capacity(NormalizationRule::ALL.len());
    for rule in NormalizationRule::ALL {
        let affected = tx.normalize_changes(table, local_txid, rule).await?;
        if affected > 0 {
            debug!("{}: {} rows in {}", rule, affected, table.changes_table());
        }
        normalized.push((rule, affected));
    }

    let applied = tx.apply_changes(table, local_txid).await?;
    info!("Applied to {}: {}", table.table, applied);

    Ok(ReconcileOutcome {
        staged,
        logged,
        normalized,
        applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MemoryStore};
    use replica_sink::{LoadTarget, ReplicaStore};

    #[tokio::test]
    async fn test_reconcile_with_nothing_staged_writes_nothing() {
        let table = fixtures::vejnavn_table();
        let mut store = MemoryStore::new();
        store.seed(&table, vec![fixtures::vejnavn(1, "Algade")]);

        let mut tx = store.begin().await.unwrap();
        let local_txid = tx.allocate_local_txid().await.unwrap();
        tx.create_staging_table(&table).await.unwrap();
        let outcome = reconcile_staged(tx.as_mut(), &table, local_txid)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(store.changes(&table).is_empty());
        assert_eq!(store.rows(&table), vec![fixtures::vejnavn(1, "Algade")]);
    }

    #[tokio::test]
    async fn test_reconcile_reports_each_rule() {
        let table = fixtures::vejnavn_table();
        let mut store = MemoryStore::new();
        store.seed(
            &table,
            vec![fixtures::vejnavn(1, "Algade"), fixtures::vejnavn(2, "Bredgade")],
        );

        let mut tx = store.begin().await.unwrap();
        let local_txid = tx.allocate_local_txid().await.unwrap();
        tx.create_staging_table(&table).await.unwrap();
        let mut sink = tx.bulk_load(&table, LoadTarget::Staging).await.unwrap();
        sink.write_batch(vec![
            fixtures::vejnavn_event(10, "update", 3, "Cirkelvej"),
            fixtures::vejnavn_event(11, "insert", 1, "Algade 1"),
            fixtures::vejnavn_event(12, "delete", 4, "Dalvej"),
            fixtures::vejnavn_event(13, "insert", 2, "Bredgade gammel"),
            fixtures::vejnavn_event(14, "update", 2, "Bredgade ny"),
        ])
        .await
        .unwrap();
        sink.finish().await.unwrap();

        let outcome = reconcile_staged(tx.as_mut(), &table, local_txid)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.staged, 5);
        assert_eq!(outcome.logged, 4);
        assert_eq!(
            outcome.normalized,
            vec![
                (NormalizationRule::UpdateOfAbsentRowToInsert, 1),
                (NormalizationRule::InsertOfExistingRowToUpdate, 1),
                (NormalizationRule::DropDeleteOfAbsentRow, 1),
            ]
        );
        assert_eq!(
            outcome.applied,
            ChangeSummary {
                inserted: 1,
                updated: 2,
                deleted: 0
            }
        );
        assert_eq!(
            store.rows(&table),
            vec![
                fixtures::vejnavn(1, "Algade 1"),
                fixtures::vejnavn(2, "Bredgade ny"),
                fixtures::vejnavn(3, "Cirkelvej"),
            ]
        );
    }
}
