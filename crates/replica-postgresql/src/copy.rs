//! COPY-based bulk row sink.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use replica_core::Row;
use replica_sink::{RowSink, StoreError};
use tokio_postgres::{CopyInSink, Transaction};
use tracing::debug;

/// Encode rows as `;`-delimited CSV. `None` becomes an empty, unquoted field,
/// which `COPY ... NULL ''` loads as NULL.
pub fn encode_rows(rows: &[Row]) -> Result<Bytes, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row.iter().map(|value| value.as_deref().unwrap_or("")))?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(Bytes::from(buffer))
}

/// Bulk sink streaming batches into one `COPY ... FROM STDIN`.
pub struct CopyRowSink {
    table: String,
    sink: Pin<Box<CopyInSink<Bytes>>>,
    rows: u64,
}

impl CopyRowSink {
    /// Start the copy inside `transaction`.
    pub async fn open(
        transaction: &Transaction<'_>,
        table: impl Into<String>,
        copy_statement: &str,
    ) -> Result<Self, StoreError> {
        let table = table.into();
        debug!("Opening bulk load: {}", copy_statement);
        let sink = transaction
            .copy_in(copy_statement)
            .await
            .map_err(|e| StoreError::bulk_load(&table, e))?;
        Ok(Self {
            table,
            sink: Box::pin(sink),
            rows: 0,
        })
    }
}

#[async_trait]
impl RowSink for CopyRowSink {
    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let data = encode_rows(&rows).map_err(|e| StoreError::bulk_load(&self.table, e))?;
        self.sink
            .send(data)
            .await
            .map_err(|e| StoreError::bulk_load(&self.table, e))?;
        self.rows += rows.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64, StoreError> {
        let copied = self
            .sink
            .as_mut()
            .finish()
            .await
            .map_err(|e| StoreError::bulk_load(&self.table, e))?;
        if copied != self.rows {
            return Err(StoreError::invariant(format!(
                "copied {copied} rows into {} but {} were sent",
                self.table, self.rows
            )));
        }
        debug!("Bulk load into {} finished: {} rows", self.table, copied);
        Ok(copied)
    }
}
