//! Streaming copy pipeline.
//!
//! Moves records from a remote stream through a row mapper into a bulk-load
//! sink. The producer (reading and mapping records) and the consumer
//! (batching and writing rows) run concurrently, joined by
//! [`tokio::try_join!`]: the first error from either side is returned and
//! the other side is dropped mid-flight.
//!
//! The hand-off is a channel of capacity one, so the producer is never more
//! than one row ahead of what the consumer has taken. Memory stays bounded
//! by the batch size no matter how large the stream is.

use futures::{Stream, StreamExt};
use replica_core::{EncodeError, Row};
use replica_sink::{RowSink, StoreError};
use replica_sync_remote::TransportError;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ReplicationError;

/// Rows per bulk-load batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Copy every item of `source`, mapped by `map`, into `sink` in batches of
/// `batch_size` rows, preserving stream order.
///
/// Returns the number of rows the sink reports as loaded. The sink is
/// finished only when the whole stream was delivered.
pub async fn copy_stream<S, T, F>(
    source: S,
    mut map: F,
    sink: Box<dyn RowSink + '_>,
    batch_size: usize,
) -> Result<u64, ReplicationError>
where
    S: Stream<Item = Result<T, TransportError>> + Send + Unpin,
    T: Send,
    F: FnMut(T) -> Result<Row, EncodeError> + Send,
{
    let batch_size = batch_size.max(1);
    let (tx, mut rx) = mpsc::channel::<Row>(1);

    let produce = async move {
        let mut source = source;
        let mut produced = 0u64;
        while let Some(item) = source.next().await {
            let row = map(item?)?;
            if tx.send(row).await.is_err() {
                // Consumer gave up; its error is what try_join reports.
                break;
            }
            produced += 1;
        }
        Ok::<u64, ReplicationError>(produced)
    };

    let consume = async move {
        let mut sink = sink;
        let mut batch = Vec::with_capacity(batch_size);
        let mut batches = 0usize;
        while let Some(row) = rx.recv().await {
            batch.push(row);
            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                sink.write_batch(full).await?;
                batches += 1;
            }
        }
        if !batch.is_empty() {
            sink.write_batch(batch).await?;
            batches += 1;
        }
        let loaded = sink.finish().await?;
        debug!("Bulk load finished after {} batches", batches);
        Ok::<u64, ReplicationError>(loaded)
    };

    let (produced, loaded) = tokio::try_join!(produce, consume)?;
    if produced != loaded {
        return Err(StoreError::invariant(format!(
            "bulk load reported {loaded} rows but {produced} were streamed"
        ))
        .into());
    }
    Ok(loaded)
}
