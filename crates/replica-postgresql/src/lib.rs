//! PostgreSQL replica store for replica-sync
//!
//! Implements the `replica-sink` storage seam on PostgreSQL:
//!
//! - [`PgStore`] / [`PgTransaction`] - one transaction per update cycle, ledger included
//! - [`CopyRowSink`] - bulk loads through `COPY ... FROM STDIN` in CSV format
//! - [`ReplicationSql`] - every staging, dedup, normalize, diff and apply statement
//! - [`PostgreSQLDdl`] - replication schema and per-entity table DDL
//!
//! All statements are assembled with [`StatementBuilder`], which binds values
//! as parameters and only ever splices quoted identifiers into SQL text.

mod copy;
pub mod ddl;
pub mod sql;
pub mod statement;
mod store;

pub use copy::{encode_rows, CopyRowSink};
pub use ddl::{PostgreSQLDdl, ToDdl};
pub use sql::ReplicationSql;
pub use statement::{quote_ident, quote_qualified, Param, Statement, StatementBuilder};
pub use store::{PgStore, PgTransaction};
