//! Scripted remote source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use replica_core::{ChangeEvent, Datamodel, Record};
use replica_sync_remote::{
    EventStream, RecordStream, RemoteSource, RemoteTransaction, TransportError,
};

/// A request the client made against a [`StaticSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    Download { entity: String, txid: Option<i64> },
    Events { entity: String, from_txid: i64, to_txid: i64 },
}

#[derive(Debug, Default)]
struct Script {
    datamodel: Datamodel,
    last_txid: i64,
    snapshots: HashMap<String, Vec<Record>>,
    events: HashMap<String, Vec<ChangeEvent>>,
    fail_after: Option<usize>,
    requests: Vec<SourceRequest>,
}

/// In-memory [`RemoteSource`] serving whatever a test scripted.
///
/// Event streams honour the requested txid window. With
/// [`StaticSource::fail_after`] set, every stream yields that many items and
/// then a transport error. Clones share the script.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    script: Arc<Mutex<Script>>,
}

const URL: &str = "static://replikering";

impl StaticSource {
    pub fn new(datamodel: Datamodel) -> Self {
        let source = Self::default();
        source.script().datamodel = datamodel;
        source
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_last_txid(&self, txid: i64) {
        self.script().last_txid = txid;
    }

    /// Replace the snapshot served for `entity`.
    pub fn set_snapshot(&self, entity: &str, records: Vec<Record>) {
        self.script().snapshots.insert(entity.to_string(), records);
    }

    /// Append events to the stream of `entity`.
    pub fn push_events(&self, entity: &str, events: Vec<ChangeEvent>) {
        self.script()
            .events
            .entry(entity.to_string())
            .or_default()
            .extend(events);
    }

    /// Break every stream after `items` items. `None` heals the source.
    pub fn fail_after(&self, items: Option<usize>) {
        self.script().fail_after = items;
    }

    /// Stream requests made so far, in order.
    pub fn requests(&self) -> Vec<SourceRequest> {
        self.script().requests.clone()
    }

    fn serve<T: Send + 'static>(
        items: Vec<T>,
        fail_after: Option<usize>,
    ) -> futures::stream::BoxStream<'static, Result<T, TransportError>> {
        match fail_after {
            Some(limit) => stream::iter(items.into_iter().take(limit).map(Ok))
                .chain(stream::once(async {
                    Err(TransportError::interrupted(URL, "connection reset"))
                }))
                .boxed(),
            None => stream::iter(items.into_iter().map(Ok)).boxed(),
        }
    }
}

#[async_trait]
impl RemoteSource for StaticSource {
    async fn datamodel(&self) -> Result<Datamodel, TransportError> {
        Ok(self.script().datamodel.clone())
    }

    async fn last_transaction(&self) -> Result<RemoteTransaction, TransportError> {
        Ok(RemoteTransaction {
            txid: self.script().last_txid,
        })
    }

    async fn download_stream(
        &self,
        entity: &str,
        txid: Option<i64>,
    ) -> Result<RecordStream, TransportError> {
        let mut script = self.script();
        script.requests.push(SourceRequest::Download {
            entity: entity.to_string(),
            txid,
        });
        let records = script.snapshots.get(entity).cloned().unwrap_or_default();
        Ok(Self::serve(records, script.fail_after))
    }

    async fn event_stream(
        &self,
        entity: &str,
        from_txid: i64,
        to_txid: i64,
    ) -> Result<EventStream, TransportError> {
        let mut script = self.script();
        script.requests.push(SourceRequest::Events {
            entity: entity.to_string(),
            from_txid,
            to_txid,
        });
        let events: Vec<ChangeEvent> = script
            .events
            .get(entity)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.txid >= from_txid && e.txid <= to_txid)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::serve(events, script.fail_after))
    }
}
