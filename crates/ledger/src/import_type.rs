//! Import type enumeration for ledger entries.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the data behind a ledger entry was obtained.
///
/// Ledger entries are written at the end of every successful cycle:
/// - `Download` after an initial load or a download-based resync
/// - `Event` after applying an incremental event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportType {
    /// Full snapshot download at the recorded remote txid.
    Download,

    /// Incremental event stream applied up to the recorded remote txid.
    Event,
}

impl ImportType {
    /// Get the string representation stored in the ledger table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Download => "download",
            ImportType::Event => "event",
        }
    }
}

impl std::fmt::Display for ImportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(ImportType::Download),
            "event" => Ok(ImportType::Event),
            other => Err(format!("Unknown import type: {other}")),
        }
    }
}
