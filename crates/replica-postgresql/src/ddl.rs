//! PostgreSQL DDL generation from table models.
//!
//! Produces the replication schema objects (operation enum, local txid
//! sequence, ledger table) and, per replicated entity, the target table and
//! its changes log table.

use replica_core::{AttributeType, TableModel};

use crate::sql::{ReplicationSql, LEDGER_TABLE, LOCAL_TXID_SEQUENCE, OPERATION_TYPE};
use crate::statement::{quote_ident, quote_qualified};

/// Trait for generating DDL statements.
pub trait ToDdl {
    /// Statements creating the objects shared by all entities.
    fn replication_schema(&self) -> Vec<String>;

    /// Statements creating the target and changes tables of one entity.
    fn entity_tables(&self, table: &TableModel) -> Vec<String>;
}

/// PostgreSQL DDL generator.
pub struct PostgreSQLDdl<'a> {
    sql: &'a ReplicationSql,
}

impl<'a> PostgreSQLDdl<'a> {
    pub fn new(sql: &'a ReplicationSql) -> Self {
        Self { sql }
    }

    /// Complete script for the schema and all `tables`, one statement per line.
    pub fn script(&self, tables: &[TableModel]) -> String {
        let mut statements = Vec::new();
        if tables.iter().any(needs_postgis) {
            statements.push("CREATE EXTENSION IF NOT EXISTS postgis".to_string());
        }
        statements.extend(self.replication_schema());
        for table in tables {
            statements.extend(self.entity_tables(table));
        }
        let mut script = statements.join(";\n");
        script.push_str(";\n");
        script
    }
}

impl ToDdl for PostgreSQLDdl<'_> {
    fn replication_schema(&self) -> Vec<String> {
        let schema = quote_ident(self.sql.schema());
        vec![
            format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
            // CREATE TYPE has no IF NOT EXISTS
            format!(
                "DO $$ BEGIN CREATE TYPE {schema}.{} AS ENUM ('insert', 'update', 'delete'); \
                 EXCEPTION WHEN duplicate_object THEN NULL; END $$",
                quote_ident(OPERATION_TYPE)
            ),
            format!(
                "CREATE SEQUENCE IF NOT EXISTS {schema}.{}",
                quote_ident(LOCAL_TXID_SEQUENCE)
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {schema}.{} (\
                 source_txid bigint NOT NULL, \
                 local_txid bigint NOT NULL, \
                 entity text NOT NULL, \
                 type text NOT NULL CHECK (type IN ('download', 'event')), \
                 recorded_at timestamptz NOT NULL DEFAULT now(), \
                 PRIMARY KEY (entity, local_txid))",
                quote_ident(LEDGER_TABLE)
            ),
        ]
    }

    fn entity_tables(&self, table: &TableModel) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some((schema, _)) = table.table.split_once('.') {
            if schema != self.sql.schema() {
                statements.push(format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    quote_ident(schema)
                ));
            }
        }

        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|column| {
                let not_null = if table.primary_key.contains(&column.name) {
                    " NOT NULL"
                } else {
                    ""
                };
                format!(
                    "{} {}{not_null}",
                    quote_ident(&column.name),
                    column.sql_type()
                )
            })
            .collect();
        let key: Vec<String> = table.primary_key.iter().map(|k| quote_ident(k)).collect();
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            quote_qualified(&table.table),
            columns.join(", "),
            key.join(", ")
        ));

        let change_columns: Vec<String> = table
            .columns
            .iter()
            .map(|column| format!("{} {}", quote_ident(&column.name), column.sql_type()))
            .collect();
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (txid bigint NOT NULL, operation {} NOT NULL, {})",
            quote_qualified(&table.changes_table()),
            self.sql.operation_type(),
            change_columns.join(", ")
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (txid)",
            quote_ident(&format!("{}_changes_txid_idx", table.base_name())),
            quote_qualified(&table.changes_table())
        ));
        statements
    }
}

fn needs_postgis(table: &TableModel) -> bool {
    table.columns.iter().any(|c| {
        matches!(
            c.attribute_type,
            AttributeType::Point2d | AttributeType::Geometry | AttributeType::Geometry3d
        )
    })
}
