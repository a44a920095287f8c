//! ReplicaStore, ReplicaTransaction and RowSink trait definitions.

use async_trait::async_trait;
use ledger::Ledger;
use replica_core::{Row, TableModel};

use crate::StoreError;

/// Where a bulk load writes its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    /// The target table itself. Only valid while it is empty (initial load).
    Table,

    /// The per-cycle staging table. Rows carry `txid` and `operation` first.
    Staging,

    /// The per-cycle scratch table receiving a fresh snapshot for a resync.
    Scratch,
}

impl LoadTarget {
    /// Table name this target resolves to for `table`.
    pub fn table_name(&self, table: &TableModel) -> String {
        match self {
            LoadTarget::Table => table.table.clone(),
            LoadTarget::Staging => table.staging_table(),
            LoadTarget::Scratch => table.scratch_table(),
        }
    }
}

/// Rewrites applied to a deduplicated changeset against current table state.
///
/// Applied in [`NormalizationRule::ALL`] order. Each rule only looks at
/// whether the row's key exists in the target table, so the rules commute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationRule {
    /// `update` of a row the table does not have becomes `insert`.
    UpdateOfAbsentRowToInsert,

    /// `insert` of a row the table already has becomes `update`.
    InsertOfExistingRowToUpdate,

    /// `delete` of a row the table does not have is dropped.
    DropDeleteOfAbsentRow,
}

impl NormalizationRule {
    pub const ALL: [NormalizationRule; 3] = [
        NormalizationRule::UpdateOfAbsentRowToInsert,
        NormalizationRule::InsertOfExistingRowToUpdate,
        NormalizationRule::DropDeleteOfAbsentRow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationRule::UpdateOfAbsentRowToInsert => "update-of-absent-row-to-insert",
            NormalizationRule::InsertOfExistingRowToUpdate => "insert-of-existing-row-to-update",
            NormalizationRule::DropDeleteOfAbsentRow => "drop-delete-of-absent-row",
        }
    }
}

impl std::fmt::Display for NormalizationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts materialized by one apply or diff step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ChangeSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl std::ops::Add for ChangeSummary {
    type Output = ChangeSummary;

    fn add(self, other: ChangeSummary) -> ChangeSummary {
        ChangeSummary {
            inserted: self.inserted + other.inserted,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
        }
    }
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted",
            self.inserted, self.updated, self.deleted
        )
    }
}

/// Receiver end of a bulk load.
///
/// Rows are written in the order given. Nothing written is visible outside
/// the owning transaction until it commits.
#[async_trait]
pub trait RowSink: Send {
    /// Write one batch of encoded rows.
    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Complete the load and return the number of rows written.
    async fn finish(self: Box<Self>) -> Result<u64, StoreError>;
}

/// One local database transaction, owned by a single update cycle.
///
/// The ledger half ([`Ledger`]) shares this transaction, so a ledger entry
/// commits together with the data it describes. Dropping a transaction
/// without calling [`ReplicaTransaction::commit`] rolls it back.
#[async_trait]
pub trait ReplicaTransaction: Ledger<Error = StoreError> {
    /// Draw the local txid every write of this cycle is tagged with.
    async fn allocate_local_txid(&mut self) -> Result<i64, StoreError>;

    /// Open a bulk load into `target`.
    async fn bulk_load<'s>(
        &'s mut self,
        table: &TableModel,
        target: LoadTarget,
    ) -> Result<Box<dyn RowSink + 's>, StoreError>;

    /// Create the empty staging table for this cycle.
    async fn create_staging_table(&mut self, table: &TableModel) -> Result<(), StoreError>;

    /// Number of events currently staged.
    async fn staged_count(&mut self, table: &TableModel) -> Result<u64, StoreError>;

    /// Move the latest staged event per row key into the changes log,
    /// tagged with `local_txid`. Returns the number of log rows written.
    ///
    /// Latest means highest remote txid; equal txids resolve to the event
    /// that arrived last.
    async fn promote_staged(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<u64, StoreError>;

    async fn drop_staging_table(&mut self, table: &TableModel) -> Result<(), StoreError>;

    /// Apply one normalization rule to the changes logged under `local_txid`.
    /// Returns the number of log rows rewritten or dropped.
    async fn normalize_changes(
        &mut self,
        table: &TableModel,
        local_txid: i64,
        rule: NormalizationRule,
    ) -> Result<u64, StoreError>;

    /// Create the empty scratch table for a resync.
    async fn create_scratch_table(&mut self, table: &TableModel) -> Result<(), StoreError>;

    /// Log the differences between the scratch snapshot and the target table
    /// as changes under `local_txid`.
    async fn diff_scratch(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<ChangeSummary, StoreError>;

    async fn drop_scratch_table(&mut self, table: &TableModel) -> Result<(), StoreError>;

    /// Materialize the changes logged under `local_txid` into the target
    /// table: deletes, then updates of rows that differ, then inserts.
    async fn apply_changes(
        &mut self,
        table: &TableModel,
        local_txid: i64,
    ) -> Result<ChangeSummary, StoreError>;

    /// Number of rows in the target table.
    async fn row_count(&mut self, table: &TableModel) -> Result<u64, StoreError>;

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A local database able to host replicated tables and the ledger.
#[async_trait]
pub trait ReplicaStore: Send {
    /// Start a transaction for one update cycle.
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn ReplicaTransaction + 'a>, StoreError>;
}
