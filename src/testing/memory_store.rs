//! In-memory replica store.
//!
//! Mirrors what the PostgreSQL store does with real transactions: `begin`
//! snapshots the committed state, every write goes to the snapshot, and
//! only `commit` publishes it. Temporary tables vanish at commit, and the
//! local txid sequence is never rolled back, as with a database sequence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ledger::{Ledger, MemoryLedger, SourceTransaction};
use replica_core::{Operation, Row, TableModel};
use replica_sink::reconcile::{self, KeyedRows, LoggedChange, StagedEvent};
use replica_sink::{
    ChangeSummary, LoadTarget, NormalizationRule, ReplicaStore, ReplicaTransaction, RowSink,
    StoreError,
};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct StoreState {
    tables: HashMap<String, KeyedRows>,
    changes: HashMap<String, Vec<LoggedChange>>,
    temp_tables: HashMap<String, Vec<Row>>,
    ledger: MemoryLedger,
}

/// Transactional in-memory [`ReplicaStore`].
///
/// Clones share state, so a test can keep a handle while the client owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<StoreState>>,
    sequence: Arc<AtomicI64>,
    loaded_rows: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.committed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put `rows` into `table` outside any transaction.
    pub fn seed(&self, table: &TableModel, rows: Vec<Row>) {
        let key_indexes = table.key_indexes();
        let mut state = self.state();
        let target = state.tables.entry(table.table.clone()).or_default();
        for row in rows {
            target.insert(reconcile::row_key(&row, &key_indexes), row);
        }
    }

    /// Committed rows of `table`, ordered by key.
    pub fn rows(&self, table: &TableModel) -> Vec<Row> {
        self.state()
            .tables
            .get(&table.table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Committed changes log of `table`.
    pub fn changes(&self, table: &TableModel) -> Vec<LoggedChange> {
        self.state()
            .changes
            .get(&table.changes_table())
            .cloned()
            .unwrap_or_default()
    }

    /// Committed ledger entries, in append order.
    pub fn ledger_entries(&self) -> Vec<SourceTransaction> {
        self.state().ledger.entries().to_vec()
    }

    /// Committed watermark of `entity`.
    pub fn watermark(&self, entity: &str) -> Option<i64> {
        self.state().ledger.watermark(entity)
    }

    /// Rows accepted by bulk loads so far, committed or not.
    pub fn loaded_rows(&self) -> u64 {
        self.loaded_rows.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplicaStore for MemoryStore {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn ReplicaTransaction + 'a>, StoreError> {
        let work = self.state().clone();
        Ok(Box::new(MemoryTransaction { store: self, work }))
    }
}

/// One transaction over a [`MemoryStore`]: a private copy of its state.
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    work: StoreState,
}

impl<'a> MemoryTransaction<'a> {
    fn temp_table(&self, name: &str) -> Result<&Vec<Row>, StoreError> {
        self.work
            .temp_tables
            .get(name)
            .ok_or_else(|| StoreError::database(format!("relation \"{name}\" does not exist")))
    }

    fn create_temp_table(&mut self, name: String) -> Result<(), StoreError> {
        if self.work.temp_tables.contains_key(&name) {
            return Err(StoreError::database(format!(
                "relation \"{name}\" already exists"
            )));
        }
        self.work.temp_tables.insert(name, Vec::new());
        Ok(())
    }

    fn drop_temp_table(&mut self, name: &str) -> Result<(), StoreError> {
        self.work
            .temp_tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::database(format!("table \"{name}\" does not exist")))
    }

    fn table_rows(&self, table: &TableModel) -> KeyedRows {
        self.work
            .tables
            .get(&table.table)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl<'a> Ledger for MemoryTransaction<'a> {
    type Error = StoreError;

    async fn last_entry(&mut self, entity: &str) -> Result<Option<SourceTransaction>, StoreError> {
        Ok(self.work.ledger.last_entry(entity).await?)
    }

    async fn record(&mut self, entry: &SourceTransaction) -> Result<(), StoreError> {
        Ok(self.work.ledger.record(entry).await?)
    }
}

#[async_trait]
impl<'a> ReplicaTransaction for MemoryTransaction<'a> {
    async fn allocate_local_txid(&mut self) -> Result<i64, StoreError> {
        Ok(self.store.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn bulk_load<'s>(
        &'s mut self,
        table: &TableModel,
        target: LoadTarget,
    ) -> Result<Box<dyn RowSink + 's>, StoreError> {
        let name = target.table_name(table);
        if target != LoadTarget::Table {
            self.temp_table(&name)?;
        }
        Ok(Box::new(MemorySink {
            state: &mut self.work,
            loaded_rows: &self.store.loaded_rows,
            name,
            target,
            key_indexes: table.key_indexes(),
            rows: 0,
        }))
    }

    async fn create_staging_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.create_temp_table(table.staging_table())
    }

    async fn staged_count(&mut self, table: &TableModel) -> Result<u64, StoreError> {
        Ok(self.temp_table(&table.staging_table())?.len() as u64)
    }

    async fn promote_staged(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<u64, StoreError> {
        let staged = self
            .temp_table(&table.staging_table())?
            .iter()
            .cloned()
            .map(StagedEvent::from_staging_row)
            .collect::<Result<Vec<_>, _>>()?;
        let latest = reconcile::latest_per_key(staged, &table.key_indexes());
        let promoted = latest.len() as u64;
        let log = self.work.changes.entry(table.changes_table()).or_default();
        log.extend(latest.into_iter().map(|event| LoggedChange {
            local_txid,
            operation: event.operation,
            row: event.row,
        }));
        Ok(promoted)
    }

    async fn drop_staging_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.drop_temp_table(&table.staging_table())
    }

    async fn normalize_changes(
        &mut self,
        table: &TableModel,
        local_txid: i64,
        rule: NormalizationRule,
    ) -> Result<u64, StoreError> {
        let current = self.table_rows(table);
        let log = self.work.changes.entry(table.changes_table()).or_default();
        Ok(reconcile::normalize(
            log,
            local_txid,
            rule,
            &table.key_indexes(),
            |key| current.contains_key(key),
        ))
    }

    async fn create_scratch_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.create_temp_table(table.scratch_table())
    }

    async fn diff_scratch(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<ChangeSummary, StoreError> {
        let snapshot = self.temp_table(&table.scratch_table())?.clone();
        let diff = reconcile::diff_snapshot(
            &self.table_rows(table),
            &snapshot,
            &table.key_indexes(),
            local_txid,
        );
        let mut summary = ChangeSummary::default();
        for change in &diff {
            match change.operation {
                Operation::Insert => summary.inserted += 1,
                Operation::Update => summary.updated += 1,
                Operation::Delete => summary.deleted += 1,
            }
        }
        self.work
            .changes
            .entry(table.changes_table())
            .or_default()
            .extend(diff);
        Ok(summary)
    }

    async fn drop_scratch_table(&mut self, table: &TableModel) -> Result<(), StoreError> {
        self.drop_temp_table(&table.scratch_table())
    }

    async fn apply_changes(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<ChangeSummary, StoreError> {
        let log = self
            .work
            .changes
            .get(&table.changes_table())
            .cloned()
            .unwrap_or_default();
        let rows = self.work.tables.entry(table.table.clone()).or_default();
        reconcile::apply_changes(rows, &log, local_txid, &table.key_indexes())
    }

    async fn row_count(&mut self, table: &TableModel) -> Result<u64, StoreError> {
        Ok(self
            .work
            .tables
            .get(&table.table)
            .map_or(0, |rows| rows.len() as u64))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { store, mut work } = *self;
        work.temp_tables.clear();
        *store.state() = work;
        debug!("Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!("Rolled back in-memory transaction");
        Ok(())
    }
}

/// Bulk sink writing into a transaction's working state.
struct MemorySink<'s> {
    state: &'s mut StoreState,
    loaded_rows: &'s AtomicU64,
    name: String,
    target: LoadTarget,
    key_indexes: Vec<usize>,
    rows: u64,
}

#[async_trait]
impl<'s> RowSink for MemorySink<'s> {
    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<(), StoreError> {
        for row in rows {
            // The bulk-load format cannot tell an empty string from NULL.
            let row: Row = row
                .into_iter()
                .map(|value| value.filter(|v| !v.is_empty()))
                .collect();
            match self.target {
                LoadTarget::Table => {
                    let table = self.state.tables.entry(self.name.clone()).or_default();
                    let key = reconcile::row_key(&row, &self.key_indexes);
                    if table.contains_key(&key) {
                        return Err(StoreError::bulk_load(
                            &self.name,
                            format!("duplicate key {key:?}"),
                        ));
                    }
                    table.insert(key, row);
                }
                LoadTarget::Staging | LoadTarget::Scratch => {
                    self.state
                        .temp_tables
                        .entry(self.name.clone())
                        .or_default()
                        .push(row);
                }
            }
            self.rows += 1;
            self.loaded_rows.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64, StoreError> {
        Ok(self.rows)
    }
}
