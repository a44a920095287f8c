//! Test doubles for running replication cycles without PostgreSQL or HTTP
//!
//! - [`MemoryStore`] - transactional in-memory replica store
//! - [`StaticSource`] - scripted remote source with failure injection
//! - [`RecordingSink`] - bulk-load sink recording every batch it receives
//! - [`fixtures`] - a small `Vejnavn` entity and helpers building its rows
//!

pub mod fixtures;
pub mod memory_store;
pub mod recording_sink;
pub mod static_source;

pub use memory_store::MemoryStore;
pub use recording_sink::RecordingSink;
pub use static_source::{SourceRequest, StaticSource};
