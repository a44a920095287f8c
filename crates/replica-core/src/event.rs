//! Change events published by the remote event stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A full row as published by the remote source, keyed by attribute name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Per-row operation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// One row-level change produced by remote transaction `txid`.
///
/// Within one entity's stream, `txid` is non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub txid: i64,
    pub operation: Operation,
    pub data: Record,
}

impl ChangeEvent {
    pub fn new(txid: i64, operation: Operation, data: Record) -> Self {
        Self {
            txid,
            operation,
            data,
        }
    }
}
