//! Replication cycle tests
//!
//! Run full initialize / update / resync cycles against the in-memory store
//! and a scripted remote source. No database or network required.

mod atomicity;
mod helpers;
mod ledger_progress;
mod reconciliation;
