use thiserror::Error;

/// Boxed error from a concrete database driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by replica stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected a statement or the connection failed.
    #[error("database error: {0}")]
    Database(#[source] BoxError),

    /// A bulk load could not be completed.
    #[error("bulk load into {table} failed: {message}")]
    BulkLoad { table: String, message: String },

    /// The store reached a state reconciliation never produces.
    #[error("reconciliation invariant violated: {0}")]
    Invariant(String),
}

impl StoreError {
    pub fn database(err: impl Into<BoxError>) -> Self {
        StoreError::Database(err.into())
    }

    pub fn bulk_load(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StoreError::BulkLoad {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        StoreError::Invariant(message.into())
    }

    /// Whether this error reports a broken invariant rather than a failing database.
    pub fn is_invariant(&self) -> bool {
        matches!(self, StoreError::Invariant(_))
    }
}

impl From<ledger::BehindWatermark> for StoreError {
    fn from(err: ledger::BehindWatermark) -> Self {
        StoreError::Invariant(err.to_string())
    }
}
