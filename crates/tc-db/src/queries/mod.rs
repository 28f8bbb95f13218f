//! Database query modules.
//!
//! `jobs` and `renditions` are the single-record adapters; `outcomes` wraps
//! them in transactions for writes that must touch both records.

pub mod jobs;
pub mod outcomes;
pub mod renditions;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tc_core::{Error, Result};

/// Current time as a fixed-width RFC 3339 string, so text ordering matches
/// time ordering.
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Begin a write transaction that takes the database write lock up front.
pub(crate) fn immediate(conn: &Connection) -> Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))
}
