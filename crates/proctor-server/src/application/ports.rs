//! Traits the application layer depends on, implemented by infrastructure.
//!
//! The dashboard never touches a socket or a file directly.  It talks to the
//! storage collaborator through [`RowStore`], starts and stops LAN
//! advertisement through [`DiscoveryService`], and hands the token list of a
//! hosting round to a [`TokenArchive`].  Tests substitute in-memory or mock
//! implementations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use proctor_core::DiscoveryAnnouncement;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Storage rows ──────────────────────────────────────────────────────────────

/// One cell of a storage row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl RowValue {
    /// Returns the value as an integer, parsing text cells when possible.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RowValue::Int(n) => Some(*n),
            RowValue::Text(s) => s.trim().parse().ok(),
            RowValue::Bool(_) => None,
        }
    }

    /// Renders the value as text, the form used for column comparisons.
    pub fn as_text(&self) -> String {
        match self {
            RowValue::Int(n) => n.to_string(),
            RowValue::Bool(b) => b.to_string(),
            RowValue::Text(s) => s.clone(),
        }
    }
}

impl From<i64> for RowValue {
    fn from(n: i64) -> Self {
        RowValue::Int(n)
    }
}

impl From<&str> for RowValue {
    fn from(s: &str) -> Self {
        RowValue::Text(s.to_string())
    }
}

impl From<String> for RowValue {
    fn from(s: String) -> Self {
        RowValue::Text(s)
    }
}

/// A storage row: column name → value.
pub type Row = BTreeMap<String, RowValue>;

/// Convenience accessors on [`Row`].
pub trait RowExt {
    fn int(&self, column: &str) -> Option<i64>;
    fn text(&self, column: &str) -> Option<String>;
}

impl RowExt for Row {
    fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(RowValue::as_i64)
    }

    fn text(&self, column: &str) -> Option<String> {
        self.get(column).map(RowValue::as_text)
    }
}

/// Error type for storage collaborator operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The backing file content is not a valid table set.
    #[error("failed to parse storage data: {0}")]
    Parse(String),
    /// The table set could not be serialized.
    #[error("failed to serialize storage data: {0}")]
    Serialize(String),
    /// The store's internal lock was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Row-oriented storage collaborator holding exam content and answers.
///
/// Tables are addressed by name and rows by their integer `id` column.
#[cfg_attr(test, mockall::automock)]
pub trait RowStore: Send + Sync {
    /// Returns every row of `table` (empty when the table does not exist).
    fn get_all_entries(&self, table: &str) -> Result<Vec<Row>, StoreError>;

    /// Returns the row of `table` whose `id` equals `id`.
    fn get_entry(&self, table: &str, id: i64) -> Result<Option<Row>, StoreError>;

    /// Returns all rows of `table` whose `column` renders as `value`.
    fn get_entry_where(&self, table: &str, column: &str, value: &str)
        -> Result<Vec<Row>, StoreError>;

    /// Inserts `row`, or replaces the row with the same `id`.  Rows without an
    /// `id` get the next free one.  Returns the row's id.
    fn set_entry(&self, table: &str, row: Row) -> Result<i64, StoreError>;

    /// Inserts or replaces the answer of one student to one task of one test.
    fn upsert_evaluation(
        &self,
        student_id: i64,
        test_id: i64,
        task_id: i64,
        answer: &str,
    ) -> Result<(), StoreError>;
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Error type for starting LAN advertisement.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound or configured for broadcast.
    #[error("failed to open discovery socket: {0}")]
    Socket(#[source] std::io::Error),
    /// The background thread could not be spawned.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Advertises the server on the local network.
pub trait DiscoveryService: Send + Sync {
    /// Starts broadcasting `announcement`; restarts if already running.
    fn start(&self, announcement: DiscoveryAnnouncement) -> Result<(), DiscoveryError>;

    /// Stops broadcasting without blocking on the worker.  Safe to call when
    /// not running.
    fn stop(&self);

    /// Whether the broadcast loop is currently active.
    fn is_running(&self) -> bool;
}

// ── Token archive ─────────────────────────────────────────────────────────────

/// One line of an archived token list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenListEntry {
    pub student_name: String,
    pub student_id: i64,
    pub token: String,
}

/// Persists the token list of a hosting round for the proctor to print.
pub trait TokenArchive: Send + Sync {
    /// Writes the list and returns where it was stored.
    fn archive(&self, class_name: &str, entries: &[TokenListEntry]) -> std::io::Result<PathBuf>;
}
