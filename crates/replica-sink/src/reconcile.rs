//! Reconciliation rules over in-memory rows.
//!
//! These functions mirror, step by step, what the SQL store does with its
//! staging, changes and scratch tables. Rows are keyed by the values of the
//! table's key columns.

use std::collections::BTreeMap;

use replica_core::{Operation, Row};

use crate::{ChangeSummary, NormalizationRule, StoreError};

/// Values of the key columns of one row, in key order.
pub type RowKey = Vec<Option<String>>;

/// Rows of a table, keyed by primary key.
pub type KeyedRows = BTreeMap<RowKey, Row>;

/// Extract the key of `row`.
pub fn row_key(row: &Row, key_indexes: &[usize]) -> RowKey {
    key_indexes
        .iter()
        .map(|&i| row.get(i).cloned().flatten())
        .collect()
}

/// A change event as it sits in the staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedEvent {
    /// Remote txid of the event
    pub txid: i64,
    pub operation: Operation,
    /// Column values in table order
    pub row: Row,
}

impl StagedEvent {
    /// Split a staging row of the form `txid, operation, columns...`.
    pub fn from_staging_row(mut row: Row) -> Result<Self, StoreError> {
        if row.len() < 2 {
            return Err(StoreError::invariant(format!(
                "staging row has {} values, expected txid and operation first",
                row.len()
            )));
        }
        let columns = row.split_off(2);
        let txid = row[0]
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| StoreError::invariant(format!("invalid staged txid {:?}", row[0])))?;
        let operation = row[1]
            .as_deref()
            .and_then(|v| v.parse::<Operation>().ok())
            .ok_or_else(|| {
                StoreError::invariant(format!("invalid staged operation {:?}", row[1]))
            })?;
        Ok(Self {
            txid,
            operation,
            row: columns,
        })
    }
}

/// One row of a changes log table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedChange {
    /// Local txid of the cycle that logged the change
    pub local_txid: i64,
    pub operation: Operation,
    pub row: Row,
}

/// Keep only the latest event per row key.
///
/// Latest is the highest remote txid; on equal txids the event that comes
/// later in `events` wins. The result is ordered by key.
pub fn latest_per_key(events: Vec<StagedEvent>, key_indexes: &[usize]) -> Vec<StagedEvent> {
    let mut latest: BTreeMap<RowKey, StagedEvent> = BTreeMap::new();
    for event in events {
        let key = row_key(&event.row, key_indexes);
        match latest.get(&key) {
            Some(existing) if existing.txid > event.txid => {}
            _ => {
                latest.insert(key, event);
            }
        }
    }
    latest.into_values().collect()
}

/// Apply `rule` to the changes logged under `local_txid`.
///
/// `exists` answers whether the target table currently holds a row with the
/// given key. Returns the number of changes rewritten or dropped.
pub fn normalize(
    changes: &mut Vec<LoggedChange>,
    local_txid: i64,
    rule: NormalizationRule,
    key_indexes: &[usize],
    exists: impl Fn(&RowKey) -> bool,
) -> u64 {
    let mut affected = 0;
    match rule {
        NormalizationRule::UpdateOfAbsentRowToInsert
        | NormalizationRule::InsertOfExistingRowToUpdate => {
            let (from, to, present) = match rule {
                NormalizationRule::UpdateOfAbsentRowToInsert => {
                    (Operation::Update, Operation::Insert, false)
                }
                _ => (Operation::Insert, Operation::Update, true),
            };
            for change in changes.iter_mut() {
                if change.local_txid == local_txid
                    && change.operation == from
                    && exists(&row_key(&change.row, key_indexes)) == present
                {
                    change.operation = to;
                    affected += 1;
                }
            }
        }
        NormalizationRule::DropDeleteOfAbsentRow => {
            changes.retain(|change| {
                let drop = change.local_txid == local_txid
                    && change.operation == Operation::Delete
                    && !exists(&row_key(&change.row, key_indexes));
                if drop {
                    affected += 1;
                }
                !drop
            });
        }
    }
    affected
}

/// Changes that turn `table` into `snapshot`, tagged with `local_txid`.
///
/// Rows only in the snapshot are inserts, rows in both that differ are
/// updates, rows only in the table are deletes.
pub fn diff_snapshot(
    table: &KeyedRows,
    snapshot: &[Row],
    key_indexes: &[usize],
    local_txid: i64,
) -> Vec<LoggedChange> {
    let fresh: KeyedRows = snapshot
        .iter()
        .map(|row| (row_key(row, key_indexes), row.clone()))
        .collect();

    let mut changes = Vec::new();
    for (key, row) in &fresh {
        let operation = match table.get(key) {
            None => Operation::Insert,
            Some(current) if current != row => Operation::Update,
            Some(_) => continue,
        };
        changes.push(LoggedChange {
            local_txid,
            operation,
            row: row.clone(),
        });
    }
    for (key, row) in table {
        if !fresh.contains_key(key) {
            changes.push(LoggedChange {
                local_txid,
                operation: Operation::Delete,
                row: row.clone(),
            });
        }
    }
    changes
}

/// Materialize the changes logged under `local_txid` into `table`.
///
/// Deletes run first, then updates of rows whose values differ, then
/// inserts. Inserting a key the table already holds is an invariant
/// violation: normalization rewrites those to updates.
pub fn apply_changes(
    table: &mut KeyedRows,
    changes: &[LoggedChange],
    local_txid: i64,
    key_indexes: &[usize],
) -> Result<ChangeSummary, StoreError> {
    let mut summary = ChangeSummary::default();
    let current: Vec<&LoggedChange> = changes
        .iter()
        .filter(|c| c.local_txid == local_txid)
        .collect();

    for change in current.iter().filter(|c| c.operation == Operation::Delete) {
        if table.remove(&row_key(&change.row, key_indexes)).is_some() {
            summary.deleted += 1;
        }
    }

    for change in current.iter().filter(|c| c.operation == Operation::Update) {
        if let Some(existing) = table.get_mut(&row_key(&change.row, key_indexes)) {
            if *existing != change.row {
                *existing = change.row.clone();
                summary.updated += 1;
            }
        }
    }

    for change in current.iter().filter(|c| c.operation == Operation::Insert) {
        let key = row_key(&change.row, key_indexes);
        if table.contains_key(&key) {
            return Err(StoreError::invariant(format!(
                "insert of existing key {key:?} reached the apply step"
            )));
        }
        table.insert(key, change.row.clone());
        summary.inserted += 1;
    }

    tracing::debug!("Applied changes of local txid {}: {}", local_txid, summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, name: &str) -> Row {
        vec![Some(id.to_string()), Some(name.to_string())]
    }

    fn staged(txid: i64, operation: Operation, id: &str, name: &str) -> StagedEvent {
        StagedEvent {
            txid,
            operation,
            row: row(id, name),
        }
    }

    fn logged(operation: Operation, id: &str, name: &str) -> LoggedChange {
        LoggedChange {
            local_txid: 7,
            operation,
            row: row(id, name),
        }
    }

    fn table_with(rows: &[Row]) -> KeyedRows {
        rows.iter().map(|r| (row_key(r, &[0]), r.clone())).collect()
    }

    #[test]
    fn test_staging_row_is_split() {
        let event = StagedEvent::from_staging_row(vec![
            Some("12".to_string()),
            Some("update".to_string()),
            Some("a".to_string()),
        ])
        .unwrap();
        assert_eq!(event.txid, 12);
        assert_eq!(event.operation, Operation::Update);
        assert_eq!(event.row, vec![Some("a".to_string())]);
    }

    #[test]
    fn test_staging_row_with_bad_operation_is_rejected() {
        let err = StagedEvent::from_staging_row(vec![
            Some("12".to_string()),
            Some("upsert".to_string()),
        ])
        .unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn test_latest_per_key_keeps_highest_txid() {
        let events = vec![
            staged(5, Operation::Update, "1", "late"),
            staged(3, Operation::Insert, "1", "early"),
            staged(4, Operation::Insert, "2", "other"),
        ];
        let latest = latest_per_key(events, &[0]);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].row, row("1", "late"));
        assert_eq!(latest[0].txid, 5);
        assert_eq!(latest[1].row, row("2", "other"));
    }

    #[test]
    fn test_latest_per_key_breaks_ties_by_arrival() {
        let events = vec![
            staged(5, Operation::Update, "1", "first"),
            staged(5, Operation::Update, "1", "second"),
        ];
        let latest = latest_per_key(events, &[0]);
        assert_eq!(latest, vec![staged(5, Operation::Update, "1", "second")]);
    }

    #[test]
    fn test_normalization_rules_against_table_state() {
        let table = table_with(&[row("1", "present")]);
        let exists = |key: &RowKey| table.contains_key(key);
        let mut changes = vec![
            logged(Operation::Update, "2", "absent update"),
            logged(Operation::Insert, "1", "present insert"),
            logged(Operation::Delete, "3", "absent delete"),
            logged(Operation::Delete, "1", "present delete"),
        ];

        let mut affected = Vec::new();
        for rule in NormalizationRule::ALL {
            affected.push(normalize(&mut changes, 7, rule, &[0], exists));
        }

        assert_eq!(affected, vec![1, 1, 1]);
        assert_eq!(
            changes,
            vec![
                logged(Operation::Insert, "2", "absent update"),
                logged(Operation::Update, "1", "present insert"),
                logged(Operation::Delete, "1", "present delete"),
            ]
        );
    }

    #[test]
    fn test_normalize_ignores_other_local_txids() {
        let mut changes = vec![LoggedChange {
            local_txid: 6,
            operation: Operation::Delete,
            row: row("9", "old cycle"),
        }];
        let affected = normalize(
            &mut changes,
            7,
            NormalizationRule::DropDeleteOfAbsentRow,
            &[0],
            |_| false,
        );
        assert_eq!(affected, 0);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_diff_snapshot() {
        let table = table_with(&[row("1", "same"), row("2", "stale"), row("3", "gone")]);
        let snapshot = vec![row("1", "same"), row("2", "fresh"), row("4", "new")];
        let changes = diff_snapshot(&table, &snapshot, &[0], 7);
        assert_eq!(
            changes,
            vec![
                logged(Operation::Update, "2", "fresh"),
                logged(Operation::Insert, "4", "new"),
                logged(Operation::Delete, "3", "gone"),
            ]
        );
    }

    #[test]
    fn test_apply_changes_deletes_updates_inserts() {
        let mut table = table_with(&[row("1", "a"), row("2", "b"), row("3", "c")]);
        let changes = vec![
            logged(Operation::Delete, "1", "a"),
            logged(Operation::Update, "2", "b2"),
            logged(Operation::Update, "3", "c"),
            logged(Operation::Insert, "4", "d"),
        ];
        let summary = apply_changes(&mut table, &changes, 7, &[0]).unwrap();
        assert_eq!(
            summary,
            ChangeSummary {
                inserted: 1,
                updated: 1,
                deleted: 1
            }
        );
        assert_eq!(
            table.into_values().collect::<Vec<_>>(),
            vec![row("2", "b2"), row("3", "c"), row("4", "d")]
        );
    }

    #[test]
    fn test_apply_changes_rejects_duplicate_insert() {
        let mut table = table_with(&[row("1", "a")]);
        let changes = vec![logged(Operation::Insert, "1", "again")];
        let err = apply_changes(&mut table, &changes, 7, &[0]).unwrap_err();
        assert!(err.is_invariant());
    }
}
