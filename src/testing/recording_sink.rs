//! Bulk-load sink that records what it receives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use replica_core::Row;
use replica_sink::{RowSink, StoreError};

#[derive(Debug, Default)]
struct Recording {
    batches: Vec<Vec<Row>>,
    finished: bool,
    max_lag: usize,
}

/// [`RowSink`] keeping every batch in memory.
///
/// Clones share the recording. A sink built with [`RecordingSink::with_counter`]
/// also tracks how far a producer ran ahead: on every batch it compares the
/// producer counter (items pulled from the source) with the rows delivered so far.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    recording: Arc<Mutex<Recording>>,
    produced: Option<Arc<AtomicUsize>>,
    fail_after_batches: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(produced: Arc<AtomicUsize>) -> Self {
        Self {
            produced: Some(produced),
            ..Self::default()
        }
    }

    /// Accept `batches` batches, then fail every further write.
    pub fn failing_after_batches(batches: usize) -> Self {
        Self {
            fail_after_batches: Some(batches),
            ..Self::default()
        }
    }

    fn recording(&self) -> MutexGuard<'_, Recording> {
        self.recording.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All rows received, in delivery order.
    pub fn rows(&self) -> Vec<Row> {
        self.recording().batches.concat()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.recording().batches.iter().map(Vec::len).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.recording().finished
    }

    /// Largest observed gap between items produced and rows delivered.
    pub fn max_lag(&self) -> usize {
        self.recording().max_lag
    }
}

#[async_trait]
impl RowSink for RecordingSink {
    async fn write_batch(&mut self, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut recording = self.recording();
        if Some(recording.batches.len()) == self.fail_after_batches {
            return Err(StoreError::bulk_load("recording", "injected failure"));
        }
        recording.batches.push(rows);
        if let Some(produced) = &self.produced {
            let delivered: usize = recording.batches.iter().map(Vec::len).sum();
            let lag = produced.load(Ordering::SeqCst).saturating_sub(delivered);
            recording.max_lag = recording.max_lag.max(lag);
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64, StoreError> {
        let mut recording = self.recording();
        recording.finished = true;
        Ok(recording.batches.iter().map(|b| b.len() as u64).sum())
    }
}
