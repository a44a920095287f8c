//! Ledger storage trait.

use async_trait::async_trait;

use crate::{EntityState, SourceTransaction};

/// Trait for ledger storage operations.
///
/// Implementations are expected to be transaction-scoped: a recorded entry
/// becomes visible exactly when the data changes it describes do.
#[async_trait]
pub trait Ledger: Send {
    /// Error type of the backing store.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Latest entry for `entity`: the one with the highest `source_txid`.
    ///
    /// Returns None if the entity has never been imported.
    async fn last_entry(&mut self, entity: &str) -> Result<Option<SourceTransaction>, Self::Error>;

    /// Append one immutable entry.
    ///
    /// The entity's watermark never moves backwards: an entry whose
    /// `source_txid` is below the current watermark must be rejected with an
    /// error and leave the ledger unchanged (see
    /// [`SourceTransaction::check_follows`]). An entry at the watermark is
    /// accepted.
    async fn record(&mut self, entry: &SourceTransaction) -> Result<(), Self::Error>;

    /// Highest recorded remote txid for `entity`.
    async fn last_remote_txid(&mut self, entity: &str) -> Result<Option<i64>, Self::Error> {
        Ok(self.last_entry(entity).await?.map(|e| e.source_txid))
    }

    /// Replication state for `entity`.
    async fn entity_state(&mut self, entity: &str) -> Result<EntityState, Self::Error> {
        Ok(EntityState::from(self.last_entry(entity).await?))
    }
}
