//! Error taxonomy of a replication cycle.

use replica_core::{ConfigError, EncodeError};
use replica_sink::StoreError;
use replica_sync_remote::TransportError;
use thiserror::Error;

/// Why a replication cycle, or the client as a whole, failed.
///
/// Every cycle error leaves the cycle's transaction uncommitted, so the
/// ledger watermark is unchanged and the remedy is always to rerun the
/// same cycle.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Invalid configuration, or configuration that does not match the
    /// remote datamodel. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The remote source failed or sent something we could not read.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A remote value cannot be encoded for its attribute type.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodeError),

    /// The local database failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// The store reached a state reconciliation never produces.
    #[error("reconciliation invariant violated: {0}")]
    Reconciliation(String),

    #[error("entity {entity} has not been initialized")]
    NotInitialized { entity: String },

    #[error("entity {entity} is already initialized at remote txid {txid}")]
    AlreadyInitialized { entity: String, txid: i64 },
}

impl From<StoreError> for ReplicationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invariant(message) => ReplicationError::Reconciliation(message),
            other => ReplicationError::Store(other),
        }
    }
}

impl ReplicationError {
    /// Whether rerunning the identical cycle later may succeed.
    ///
    /// Configuration, encoding and state errors fail again until someone
    /// changes the configuration, the data or the chosen mode.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReplicationError::Transport(_)
                | ReplicationError::Store(_)
                | ReplicationError::Reconciliation(_)
        )
    }
}
