//! Replica Sync Library
//!
//! A pull-based replication client keeping a local PostgreSQL mirror of the
//! entities published by a remote replication API.
//!
//! # Features
//!
//! - Initialize: full snapshot download into an empty table
//! - Update: apply remote change events since the last recorded remote txid,
//!   deduplicated and normalized against the local rows
//! - Resync: download a fresh snapshot, diff it against the local table and
//!   apply the difference
//! - Provenance: every cycle appends a `(source_txid, local_txid, entity, type)`
//!   ledger entry in the same transaction as its data
//!
//! # Crates
//!
//! - `replica_core` - datamodel, configuration, attribute types, row mapping
//! - `ledger` - source transaction ledger
//! - `replica_sink` - storage seam and in-memory reconciliation rules
//! - `replica_sync_postgresql` - PostgreSQL store, COPY sink and DDL
//! - `replica_sync_remote` - remote source gateway over HTTP
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the replication schema and the configured tables
//! replica-sync install-schema --config replication.json --database-url postgresql://...
//!
//! # Load every configured entity once
//! replica-sync initialize --config replication.json --database-url postgresql://...
//!
//! # Apply new events for one entity
//! replica-sync update --config replication.json --database-url postgresql://... --entity Vejnavn
//! ```

use std::path::PathBuf;

use clap::Parser;

pub mod client;
pub mod config;
mod error;
pub mod pipeline;
pub mod reconcile;
pub mod testing;

pub use client::{CycleOutcome, CycleReport, EntityStatus, Mode, ReplicationClient};
pub use config::{load_config, table_models};
pub use error::ReplicationError;
pub use pipeline::{copy_stream, DEFAULT_BATCH_SIZE};
pub use reconcile::{reconcile_staged, ReconcileOutcome};

#[derive(Parser, Clone, Debug)]
pub struct ConfigOpts {
    /// Replication configuration file (JSON)
    #[arg(long, env = "REPLICA_CONFIG")]
    pub config: PathBuf,

    /// Only process these entities (repeatable; default: all configured)
    #[arg(long = "entity")]
    pub entities: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct DatabaseOpts {
    /// PostgreSQL connection string of the local replica
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Rows per bulk-load batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}
