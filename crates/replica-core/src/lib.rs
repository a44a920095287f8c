//! Core types for the replica-sync client.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - [`Datamodel`] / [`ReplicationModel`] - the remote source's entity schemas
//! - [`RawReplicationConfig`] / [`ReplicationConfig`] - the replication configuration,
//!   before and after normalization
//! - [`AttributeType`] - the closed attribute type registry (SQL type, encoder, diff comparison)
//! - [`TableModel`] / [`RowMapper`] - the physical table view of an entity and the
//!   record-to-row mapping used for bulk loading
//! - [`ChangeEvent`] / [`Operation`] - events from the remote event stream
//!
//! # Architecture
//!
//! ```text
//! replica-core (this crate)
//!    │
//!    ├─── ledger                   (source transaction ledger)
//!    ├─── replica-sink             (storage seam, uses TableModel and Row)
//!    ├─── replica-sync-postgresql  (SQL generation from TableModel)
//!    └─── replica-sync-remote      (decodes Datamodel, Record, ChangeEvent)
//! ```

pub mod config;
pub mod event;
pub mod mapper;
pub mod model;
pub mod types;

// Re-exports for convenience
pub use config::{
    normalize, validate_against_model, AttributeBinding, BindingConfig, ConfigError,
    EntityConfig, RawAttributeBinding, RawBindingConfig, RawReplicationConfig, ReplicationConfig,
};
pub use event::{ChangeEvent, Operation, Record};
pub use mapper::{ColumnModel, Row, RowMapper, TableModel, OPERATION_COLUMN, TXID_COLUMN};
pub use model::{AttributeModel, Datamodel, ReplicationModel};
pub use types::{AttributeType, DistinctClause, EncodeError, TypeBinding, SRID};
