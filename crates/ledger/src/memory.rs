//! In-memory ledger implementation.

use async_trait::async_trait;
use chrono::Utc;

use crate::store::Ledger;
use crate::{BehindWatermark, SourceTransaction};

/// In-memory implementation of the [`Ledger`] trait.
///
/// Entries are kept in append order. Cloning a `MemoryLedger` snapshots it,
/// which is how transactional stores built on top of it roll back.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    entries: Vec<SourceTransaction>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, in append order.
    pub fn entries(&self) -> &[SourceTransaction] {
        &self.entries
    }

    /// Entries for one entity, in append order.
    pub fn entries_for<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a SourceTransaction> {
        self.entries.iter().filter(move |e| e.entity == entity)
    }

    /// Highest source txid for `entity`, read without going through the async trait.
    pub fn watermark(&self, entity: &str) -> Option<i64> {
        self.entries_for(entity).map(|e| e.source_txid).max()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    type Error = BehindWatermark;

    async fn last_entry(&mut self, entity: &str) -> Result<Option<SourceTransaction>, BehindWatermark> {
        Ok(self
            .entries_for(entity)
            .max_by_key(|e| (e.source_txid, e.local_txid))
            .cloned())
    }

    async fn record(&mut self, entry: &SourceTransaction) -> Result<(), BehindWatermark> {
        entry.check_follows(self.watermark(&entry.entity))?;
        let mut entry = entry.clone();
        entry.recorded_at.get_or_insert_with(Utc::now);
        tracing::debug!(
            "Recorded {} entry for {}: remote txid {} -> local txid {}",
            entry.import_type,
            entry.entity,
            entry.source_txid,
            entry.local_txid
        );
        self.entries.push(entry);
        Ok(())
    }
}
