//! Replica store trait abstraction.
//!
//! This crate defines the storage seam the replication client writes through.
//! A [`ReplicaStore`] hands out [`ReplicaTransaction`]s; everything one update
//! cycle does (bulk loads, staging, reconciliation, table apply and the ledger
//! entry) happens inside a single transaction and becomes visible on
//! [`ReplicaTransaction::commit`] or not at all.
//!
//! The PostgreSQL implementation lives in `replica-sync-postgresql`. The
//! [`reconcile`] module holds the same reconciliation rules as plain functions
//! over rows, for stores that do not speak SQL.

mod error;
pub mod reconcile;
mod traits;

pub use error::{BoxError, StoreError};
pub use traits::{
    ChangeSummary, LoadTarget, NormalizationRule, ReplicaStore, ReplicaTransaction, RowSink,
};
