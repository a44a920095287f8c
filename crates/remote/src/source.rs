//! RemoteSource trait definition.

use async_trait::async_trait;
use futures::stream::BoxStream;
use replica_core::{ChangeEvent, Datamodel, Record};
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Stream of full records from a snapshot download.
pub type RecordStream = BoxStream<'static, Result<Record, TransportError>>;

/// Stream of change events, in remote txid order.
pub type EventStream = BoxStream<'static, Result<ChangeEvent, TransportError>>;

/// The remote source's current watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    pub txid: i64,
}

/// Pull interface of the authoritative remote source.
///
/// Streams are lazy: opening one may already fail, and every item may fail
/// on its own. Nothing here has side effects on the remote side.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Schema of every entity the source offers.
    async fn datamodel(&self) -> Result<Datamodel, TransportError>;

    /// Latest remote transaction.
    async fn last_transaction(&self) -> Result<RemoteTransaction, TransportError>;

    /// Full snapshot of `entity`, consistent with `txid` when given,
    /// otherwise with the latest transaction.
    async fn download_stream(
        &self,
        entity: &str,
        txid: Option<i64>,
    ) -> Result<RecordStream, TransportError>;

    /// Change events of `entity` with `from_txid <= txid <= to_txid`.
    async fn event_stream(
        &self,
        entity: &str,
        from_txid: i64,
        to_txid: i64,
    ) -> Result<EventStream, TransportError>;
}
