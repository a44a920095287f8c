//! Remote source gateway for replica-sync
//!
//! The replication client pulls everything it knows from one authoritative
//! remote source through the [`RemoteSource`] trait:
//!
//! - `datamodel()` - entity schemas, used to validate the configuration
//! - `last_transaction()` - the current remote txid
//! - `download_stream(entity, txid)` - a full snapshot, record by record
//! - `event_stream(entity, from, to)` - change events in a txid window
//!
//! [`HttpRemoteSource`] implements it over HTTP with NDJSON streaming bodies.

mod error;
pub mod http;
pub mod ndjson;
mod source;

pub use error::TransportError;
pub use http::HttpRemoteSource;
pub use source::{EventStream, RecordStream, RemoteSource, RemoteTransaction};
