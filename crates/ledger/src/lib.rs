//! Source transaction ledger for replica-sync
//!
//! Records, per entity, which remote transaction produced which local
//! transaction and how (full download or event stream). The highest recorded
//! remote txid is the entity's watermark: the next incremental fetch always
//! starts right after it.
//!
//! # Architecture
//!
//! This crate provides:
//! - `SourceTransaction` - one append-only ledger entry
//! - `ImportType` - download vs event import
//! - `EntityState` - uninitialized / initialized, derived from the latest entry
//! - `Ledger` trait - storage-agnostic ledger operations
//! - `MemoryLedger` - in-memory implementation
//!
//! The PostgreSQL implementation lives with the rest of the PostgreSQL store,
//! because ledger writes must share the transaction of the data they describe.
//!
//! There is no gap detection: the remote event stream is the sole source of
//! truth for what changed between two txids.

mod entry;
mod import_type;
mod memory;
pub mod store;


pub use entry::{fetch_window, BehindWatermark, EntityState, SourceTransaction};
pub use import_type::ImportType;
pub use memory::MemoryLedger;
pub use store::Ledger;
