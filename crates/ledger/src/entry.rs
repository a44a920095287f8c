//! Ledger entry and per-entity state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ImportType;

/// One append-only ledger row: remote transaction `source_txid` was
/// materialized locally by local transaction `local_txid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTransaction {
    /// Remote txid the entity is consistent with after this entry
    pub source_txid: i64,
    /// Local transaction that applied the data
    pub local_txid: i64,
    /// Entity name
    pub entity: String,
    /// Download or event import
    #[serde(rename = "type")]
    pub import_type: ImportType,
    /// When the entry was written; assigned by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl SourceTransaction {
    pub fn new(
        source_txid: i64,
        local_txid: i64,
        entity: impl Into<String>,
        import_type: ImportType,
    ) -> Self {
        Self {
            source_txid,
            local_txid,
            entity: entity.into(),
            import_type,
            recorded_at: None,
        }
    }

    /// Check that recording this entry keeps the entity's watermark from
    /// moving backwards. Equal txids are allowed.
    pub fn check_follows(&self, watermark: Option<i64>) -> Result<(), BehindWatermark> {
        match watermark {
            Some(watermark) if self.source_txid < watermark => Err(BehindWatermark {
                entity: self.entity.clone(),
                source_txid: self.source_txid,
                watermark,
            }),
            _ => Ok(()),
        }
    }
}

/// A ledger entry whose remote txid is below the entity's current watermark.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ledger entry for {entity} at remote txid {source_txid} is behind watermark {watermark}")]
pub struct BehindWatermark {
    pub entity: String,
    pub source_txid: i64,
    pub watermark: i64,
}

/// Replication state of one entity, derived from its latest ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    /// Never imported
    Uninitialized,

    /// Imported at least once; `last` is the entry holding the watermark
    Initialized { last: SourceTransaction },
}

impl EntityState {
    /// Ledger watermark, if any.
    pub fn watermark(&self) -> Option<i64> {
        match self {
            EntityState::Uninitialized => None,
            EntityState::Initialized { last } => Some(last.source_txid),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, EntityState::Initialized { .. })
    }
}

impl From<Option<SourceTransaction>> for EntityState {
    fn from(last: Option<SourceTransaction>) -> Self {
        match last {
            Some(last) => EntityState::Initialized { last },
            None => EntityState::Uninitialized,
        }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityState::Uninitialized => f.write_str("uninitialized"),
            EntityState::Initialized { last } => {
                write!(
                    f,
                    "initialized at remote txid {} ({} by local txid {})",
                    last.source_txid, last.import_type, last.local_txid
                )?;
                if let Some(at) = last.recorded_at {
                    write!(f, " at {}", at.to_rfc3339())?;
                }
                Ok(())
            }
        }
    }
}

/// Inclusive range of remote txids the next incremental fetch must request.
///
/// Always starts at `watermark + 1`. `None` when the remote source is not
/// ahead of the ledger.
pub fn fetch_window(watermark: i64, current_remote_txid: i64) -> Option<(i64, i64)> {
    if current_remote_txid > watermark {
        Some((watermark + 1, current_remote_txid))
    } else {
        None
    }
}
