//! Categorical error type for the state store.
//!
//! The façade never retries and never swallows a fatal error: it attaches
//! enough context (table + operation) for the caller -- the replication FSM
//! -- to decide whether to retry the whole log entry.

use std::fmt;

/// Convenience alias used throughout the crate instead of the bare
/// `std::result::Result`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A required entity was missing (kind 1 in the error design: fatal,
    /// aborts the transaction).
    NotFound { table: &'static str, op: &'static str, id: String },

    /// A backing-store fault. The in-memory backend never actually produces
    /// this today (no I/O to fail), but the variant is kept so the façade's
    /// context-wiring has somewhere to plug in a future fallible backend.
    Backend { table: &'static str, op: &'static str, source: String },

    /// A schema or cross-table invariant was violated (e.g. a job summary
    /// missing the task-summary key for a task a record names).
    Invariant { record: String, message: String },
}

impl Error {
    pub fn not_found(table: &'static str, op: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound { table, op, id: id.into() }
    }

    pub fn backend(table: &'static str, op: &'static str, source: impl fmt::Display) -> Self {
        Error::Backend { table, op, source: source.to_string() }
    }

    pub fn invariant(record: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Invariant { record: record.into(), message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound { table, op, id } => {
                write!(f, "{table}: {op}: no such record {id:?}")
            }
            Error::Backend { table, op, source } => {
                write!(f, "{table}: {op}: backend fault: {source}")
            }
            Error::Invariant { record, message } => {
                write!(f, "invariant violated for {record}: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}
