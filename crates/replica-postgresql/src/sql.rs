//! Statements run by one replication cycle.
//!
//! Aliases used throughout: `t` is the target table, `c` the changes log,
//! `s` the staging or scratch table.

use replica_core::{DistinctClause, Operation, TableModel};
use replica_sink::NormalizationRule;

use crate::statement::{quote_ident, quote_qualified, Statement, StatementBuilder};

/// Name of the ledger table inside the replication schema.
pub const LEDGER_TABLE: &str = "source_transactions";

/// Name of the local txid sequence inside the replication schema.
pub const LOCAL_TXID_SEQUENCE: &str = "local_txid_seq";

/// Name of the change operation enum type inside the replication schema.
pub const OPERATION_TYPE: &str = "operation_type";

/// Column added to staging tables to record arrival order.
pub const ARRIVAL_COLUMN: &str = "seq";

/// Statement factory bound to one replication schema.
#[derive(Debug, Clone)]
pub struct ReplicationSql {
    schema: String,
}

impl ReplicationSql {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(name))
    }

    /// Fully quoted `schema.operation_type`.
    pub fn operation_type(&self) -> String {
        self.qualified(OPERATION_TYPE)
    }

    /// Fully quoted `schema.source_transactions`.
    pub fn ledger_table(&self) -> String {
        self.qualified(LEDGER_TABLE)
    }

    /// Append an operation literal as a bound, enum-typed parameter.
    fn operation_param(&self, builder: &mut StatementBuilder, operation: Operation) {
        builder
            .param(operation.as_str())
            .sql("::text::")
            .sql(&self.operation_type());
    }

    // Ledger

    pub fn allocate_local_txid(&self) -> Statement {
        StatementBuilder::new()
            .sql("SELECT nextval(")
            .param(self.qualified(LOCAL_TXID_SEQUENCE))
            .sql("::text::regclass)")
            .build()
    }

    pub fn last_ledger_entry(&self, entity: &str) -> Statement {
        StatementBuilder::new()
            .sql("SELECT source_txid, local_txid, entity, type, recorded_at FROM ")
            .sql(&self.ledger_table())
            .sql(" WHERE entity = ")
            .param(entity)
            .sql(" ORDER BY source_txid DESC, local_txid DESC LIMIT 1")
            .build()
    }

    pub fn record_ledger_entry(
        &self,
        source_txid: i64,
        local_txid: i64,
        entity: &str,
        import_type: &str,
    ) -> Statement {
        StatementBuilder::new()
            .sql("INSERT INTO ")
            .sql(&self.ledger_table())
            .sql(" (source_txid, local_txid, entity, type) VALUES (")
            .param(source_txid)
            .sql(", ")
            .param(local_txid)
            .sql(", ")
            .param(entity)
            .sql(", ")
            .param(import_type)
            .sql(") RETURNING recorded_at")
            .build()
    }

    // Staging

    pub fn create_staging_table(&self, table: &TableModel) -> Statement {
        StatementBuilder::new()
            .sql("CREATE TEMP TABLE ")
            .ident(&table.staging_table())
            .sql(" ON COMMIT DROP AS SELECT NULL::bigint AS txid, NULL::")
            .sql(&self.operation_type())
            .sql(" AS operation, ")
            .columns("", table.column_names())
            .sql(" FROM ")
            .table(&table.table)
            .sql(" WHERE false")
            .build()
    }

    /// Adds the arrival order column; rows copied in get increasing values.
    pub fn add_arrival_column(&self, table: &TableModel) -> Statement {
        StatementBuilder::new()
            .sql("ALTER TABLE ")
            .ident(&table.staging_table())
            .sql(" ADD COLUMN ")
            .ident(ARRIVAL_COLUMN)
            .sql(" bigserial")
            .build()
    }

    pub fn count_rows(&self, table_name: &str) -> Statement {
        StatementBuilder::new()
            .sql("SELECT COUNT(*) FROM ")
            .table(table_name)
            .build()
    }

    pub fn drop_temp_table(&self, table_name: &str) -> Statement {
        StatementBuilder::new()
            .sql("DROP TABLE IF EXISTS ")
            .ident(table_name)
            .build()
    }

    /// Latest staged event per key into the changes log.
    pub fn promote_staged(&self, table: &TableModel, local_txid: i64) -> Statement {
        let columns = table.column_names();
        let mut builder = StatementBuilder::new();
        builder
            .sql("INSERT INTO ")
            .table(&table.changes_table())
            .sql(" (txid, operation, ")
            .columns("", columns.iter().copied())
            .sql(") SELECT ")
            .param(local_txid)
            .sql("::bigint, s.operation, ")
            .columns("s", columns.iter().copied())
            .sql(" FROM (SELECT *, ROW_NUMBER() OVER (PARTITION BY ")
            .columns("", table.primary_key.iter().map(String::as_str))
            .sql(" ORDER BY txid DESC, ")
            .ident(ARRIVAL_COLUMN)
            .sql(" DESC) AS rn FROM ")
            .ident(&table.staging_table())
            .sql(") s WHERE s.rn = 1");
        builder.build()
    }

    /// Rewrite or drop logged changes according to `rule`.
    pub fn normalize(
        &self,
        table: &TableModel,
        local_txid: i64,
        rule: NormalizationRule,
    ) -> Statement {
        let keys = || table.primary_key.iter().map(String::as_str);
        let mut builder = StatementBuilder::new();
        let (matched, exists) = match rule {
            NormalizationRule::UpdateOfAbsentRowToInsert => {
                builder.sql("UPDATE ").table(&table.changes_table()).sql(" c SET operation = ");
                self.operation_param(&mut builder, Operation::Insert);
                (Operation::Update, false)
            }
            NormalizationRule::InsertOfExistingRowToUpdate => {
                builder.sql("UPDATE ").table(&table.changes_table()).sql(" c SET operation = ");
                self.operation_param(&mut builder, Operation::Update);
                (Operation::Insert, true)
            }
            NormalizationRule::DropDeleteOfAbsentRow => {
                builder.sql("DELETE FROM ").table(&table.changes_table()).sql(" c");
                (Operation::Delete, false)
            }
        };
        builder
            .sql(" WHERE c.txid = ")
            .param(local_txid)
            .sql(" AND c.operation::text = ")
            .param(matched.as_str())
            .sql(if exists { " AND EXISTS" } else { " AND NOT EXISTS" })
            .sql(" (SELECT 1 FROM ")
            .table(&table.table)
            .sql(" t WHERE ")
            .key_match("t", "c", keys())
            .sql(")");
        builder.build()
    }

    // Resync

    pub fn create_scratch_table(&self, table: &TableModel) -> Statement {
        StatementBuilder::new()
            .sql("CREATE TEMP TABLE ")
            .ident(&table.scratch_table())
            .sql(" ON COMMIT DROP AS SELECT ")
            .columns("", table.column_names())
            .sql(" FROM ")
            .table(&table.table)
            .sql(" WHERE false")
            .build()
    }

    /// Snapshot rows the target table lacks, logged as inserts.
    pub fn diff_inserts(&self, table: &TableModel, local_txid: i64) -> Statement {
        let mut builder = self.log_changes_prefix(table, local_txid, Operation::Insert);
        builder
            .columns("s", table.column_names())
            .sql(" FROM ")
            .ident(&table.scratch_table())
            .sql(" s WHERE NOT EXISTS (SELECT 1 FROM ")
            .table(&table.table)
            .sql(" t WHERE ")
            .key_match("t", "s", table.primary_key.iter().map(String::as_str))
            .sql(")");
        builder.build()
    }

    /// Snapshot rows that differ from the target table, logged as updates.
    ///
    /// `None` when every column is part of the key: such rows cannot differ.
    pub fn diff_updates(&self, table: &TableModel, local_txid: i64) -> Option<Statement> {
        let distinct = self.distinct_condition(table, "t", "s")?;
        let mut builder = self.log_changes_prefix(table, local_txid, Operation::Update);
        builder
            .columns("s", table.column_names())
            .sql(" FROM ")
            .ident(&table.scratch_table())
            .sql(" s JOIN ")
            .table(&table.table)
            .sql(" t ON ")
            .key_match("t", "s", table.primary_key.iter().map(String::as_str))
            .sql(" WHERE ")
            .sql(&distinct);
        Some(builder.build())
    }

    /// Target rows missing from the snapshot, logged as deletes.
    pub fn diff_deletes(&self, table: &TableModel, local_txid: i64) -> Statement {
        let mut builder = self.log_changes_prefix(table, local_txid, Operation::Delete);
        builder
            .columns("t", table.column_names())
            .sql(" FROM ")
            .table(&table.table)
            .sql(" t WHERE NOT EXISTS (SELECT 1 FROM ")
            .ident(&table.scratch_table())
            .sql(" s WHERE ")
            .key_match("t", "s", table.primary_key.iter().map(String::as_str))
            .sql(")");
        builder.build()
    }

    fn log_changes_prefix(
        &self,
        table: &TableModel,
        local_txid: i64,
        operation: Operation,
    ) -> StatementBuilder {
        let mut builder = StatementBuilder::new();
        builder
            .sql("INSERT INTO ")
            .table(&table.changes_table())
            .sql(" (txid, operation, ")
            .columns("", table.column_names())
            .sql(") SELECT ")
            .param(local_txid)
            .sql("::bigint, ");
        self.operation_param(&mut builder, operation);
        builder.sql(", ");
        builder
    }

    /// `(t.a IS DISTINCT FROM s.a OR ...)` over the non-key columns.
    fn distinct_condition(&self, table: &TableModel, left: &str, right: &str) -> Option<String> {
        let terms: Vec<String> = table
            .value_columns()
            .map(|column| {
                let name = quote_ident(&column.name);
                match column.distinct_clause() {
                    DistinctClause::IsDistinctFrom => {
                        format!("{left}.{name} IS DISTINCT FROM {right}.{name}")
                    }
                    DistinctClause::TextIsDistinctFrom => {
                        format!("{left}.{name}::text IS DISTINCT FROM {right}.{name}::text")
                    }
                }
            })
            .collect();
        if terms.is_empty() {
            None
        } else {
            Some(format!("({})", terms.join(" OR ")))
        }
    }

    // Apply

    pub fn apply_deletes(&self, table: &TableModel, local_txid: i64) -> Statement {
        let mut builder = StatementBuilder::new();
        builder
            .sql("DELETE FROM ")
            .table(&table.table)
            .sql(" t USING ")
            .table(&table.changes_table())
            .sql(" c WHERE c.txid = ")
            .param(local_txid)
            .sql(" AND c.operation::text = ")
            .param(Operation::Delete.as_str())
            .sql(" AND ")
            .key_match("t", "c", table.primary_key.iter().map(String::as_str));
        builder.build()
    }

    /// `None` when every column is part of the key.
    pub fn apply_updates(&self, table: &TableModel, local_txid: i64) -> Option<Statement> {
        let distinct = self.distinct_condition(table, "t", "c")?;
        let assignments: Vec<String> = table
            .value_columns()
            .map(|column| {
                let name = quote_ident(&column.name);
                format!("{name} = c.{name}")
            })
            .collect();
        let mut builder = StatementBuilder::new();
        builder
            .sql("UPDATE ")
            .table(&table.table)
            .sql(" t SET ")
            .sql(&assignments.join(", "))
            .sql(" FROM ")
            .table(&table.changes_table())
            .sql(" c WHERE c.txid = ")
            .param(local_txid)
            .sql(" AND c.operation::text = ")
            .param(Operation::Update.as_str())
            .sql(" AND ")
            .key_match("t", "c", table.primary_key.iter().map(String::as_str))
            .sql(" AND ")
            .sql(&distinct);
        Some(builder.build())
    }

    pub fn apply_inserts(&self, table: &TableModel, local_txid: i64) -> Statement {
        let mut builder = StatementBuilder::new();
        builder
            .sql("INSERT INTO ")
            .table(&table.table)
            .sql(" (")
            .columns("", table.column_names())
            .sql(") SELECT ")
            .columns("c", table.column_names())
            .sql(" FROM ")
            .table(&table.changes_table())
            .sql(" c WHERE c.txid = ")
            .param(local_txid)
            .sql(" AND c.operation::text = ")
            .param(Operation::Insert.as_str());
        builder.build()
    }

    /// `COPY ... FROM STDIN` for a bulk load. Copy statements take no parameters.
    pub fn copy_in(&self, table_name: &str, columns: &[&str]) -> String {
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER ';', QUOTE '\"', NULL '')",
            quote_qualified(table_name),
            columns.join(", ")
        )
    }
}
