//! File-backed [`RowStore`]: every table of the exam data set in one TOML file.
//!
//! The file is a set of arrays of tables, one array per table name:
//!
//! ```toml
//! [[tests]]
//! id = 1
//! name = "Networking"
//!
//! [[tasks]]
//! id = 10
//! test_id = 1
//! position = 1
//! question = "What does TCP stand for?"
//! answers = "Transmission Control Protocol|Trivial Copy Protocol"
//! type = "choice"
//!
//! [[classes]]
//! id = 3
//! name = "4AHIT"
//!
//! [[students]]
//! id = 7
//! class_id = 3
//! first_name = "Ada"
//! last_name = "Lovelace"
//! ```
//!
//! The whole file is loaded into memory at open.  Writes go to memory first
//! and are then flushed to disk (temporary file plus rename), so a crash
//! mid-write leaves the previous version intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::application::content::EVALUATIONS_TABLE;
use crate::application::ports::{Row, RowExt, RowStore, RowValue, StoreError};

type Tables = BTreeMap<String, Vec<Row>>;

/// TOML-file implementation of [`RowStore`].
pub struct FileRowStore {
    /// `None` for a purely in-memory store.
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl FileRowStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read and
    /// [`StoreError::Parse`] if it is not a valid table set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = match std::fs::read_to_string(&path) {
            Ok(content) => parse_tables(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("data file {} does not exist yet, starting empty", path.display());
                Tables::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!(
            "opened data file {} ({} table(s))",
            path.display(),
            tables.len()
        );
        Ok(Self {
            path: Some(path),
            tables: Mutex::new(tables),
        })
    }

    /// Creates a store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::new()),
        }
    }

    /// Creates an in-memory store from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Parse`] for malformed input.
    pub fn from_toml(content: &str) -> Result<Self, StoreError> {
        Ok(Self {
            path: None,
            tables: Mutex::new(parse_tables(content)?),
        })
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&tables))
    }

    /// Applies `f` and flushes the result to disk while still holding the
    /// lock, so concurrent writers cannot interleave partial files.
    fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        let result = f(&mut tables);
        if let Some(path) = &self.path {
            flush(path, &tables)?;
        }
        Ok(result)
    }
}

impl RowStore for FileRowStore {
    fn get_all_entries(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.with_tables(|t| t.get(table).cloned().unwrap_or_default())
    }

    fn get_entry(&self, table: &str, id: i64) -> Result<Option<Row>, StoreError> {
        self.with_tables(|t| {
            t.get(table)
                .and_then(|rows| rows.iter().find(|r| r.int("id") == Some(id)))
                .cloned()
        })
    }

    fn get_entry_where(&self, table: &str, column: &str, value: &str) -> Result<Vec<Row>, StoreError> {
        self.with_tables(|t| {
            t.get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| r.text(column).as_deref() == Some(value))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn set_entry(&self, table: &str, mut row: Row) -> Result<i64, StoreError> {
        self.mutate(|t| {
            let rows = t.entry(table.to_string()).or_default();
            let id = match row.int("id") {
                Some(id) => id,
                None => {
                    let next = rows.iter().filter_map(|r| r.int("id")).max().unwrap_or(0) + 1;
                    row.insert("id".to_string(), RowValue::Int(next));
                    next
                }
            };
            match rows.iter_mut().find(|r| r.int("id") == Some(id)) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
            id
        })
    }

    fn upsert_evaluation(
        &self,
        student_id: i64,
        test_id: i64,
        task_id: i64,
        answer: &str,
    ) -> Result<(), StoreError> {
        self.mutate(|t| {
            let rows = t.entry(EVALUATIONS_TABLE.to_string()).or_default();
            let key = (Some(student_id), Some(test_id), Some(task_id));
            let existing = rows
                .iter_mut()
                .find(|r| (r.int("student_id"), r.int("test_id"), r.int("task_id")) == key);
            match existing {
                Some(row) => {
                    row.insert("answer".to_string(), RowValue::from(answer));
                }
                None => {
                    let mut row = Row::new();
                    row.insert("student_id".to_string(), RowValue::Int(student_id));
                    row.insert("test_id".to_string(), RowValue::Int(test_id));
                    row.insert("task_id".to_string(), RowValue::Int(task_id));
                    row.insert("answer".to_string(), RowValue::from(answer));
                    rows.push(row);
                }
            }
        })
    }
}

fn parse_tables(content: &str) -> Result<Tables, StoreError> {
    toml::from_str(content).map_err(|e| StoreError::Parse(e.to_string()))
}

fn flush(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    let content = toml::to_string_pretty(tables).map_err(|e| StoreError::Serialize(e.to_string()))?;
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const SAMPLE: &str = r#"
[[tests]]
id = 1
name = "Networking"

[[tasks]]
id = 10
test_id = 1
position = 2
question = "Port of HTTP?"
answers = "80|443"
type = "choice"

[[tasks]]
id = 11
test_id = 1
position = 1
question = "Explain ARP."
type = "text"
"#;

    fn row(pairs: &[(&str, RowValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_from_toml_reads_arrays_of_tables() {
        // Arrange
        let store = FileRowStore::from_toml(SAMPLE).unwrap();

        // Act
        let tasks = store.get_entry_where("tasks", "test_id", "1").unwrap();
        let test = store.get_entry("tests", 1).unwrap();

        // Assert
        assert_eq!(tasks.len(), 2);
        assert_eq!(test.and_then(|r| r.text("name")), Some("Networking".to_string()));
    }

    #[test]
    fn test_missing_table_is_empty_not_error() {
        let store = FileRowStore::in_memory();
        assert!(store.get_all_entries("nope").unwrap().is_empty());
        assert!(store.get_entry("nope", 1).unwrap().is_none());
    }

    #[test]
    fn test_set_entry_assigns_next_id() {
        let store = FileRowStore::from_toml(SAMPLE).unwrap();

        let id = store
            .set_entry("tasks", row(&[("test_id", RowValue::Int(1))]))
            .unwrap();

        assert_eq!(id, 12);
        assert_eq!(store.get_all_entries("tasks").unwrap().len(), 3);
    }

    #[test]
    fn test_set_entry_with_existing_id_replaces_row() {
        let store = FileRowStore::from_toml(SAMPLE).unwrap();

        store
            .set_entry(
                "tests",
                row(&[("id", RowValue::Int(1)), ("name", RowValue::from("Routing"))]),
            )
            .unwrap();

        let rows = store.get_all_entries("tests").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("name").as_deref(), Some("Routing"));
    }

    #[test]
    fn test_upsert_evaluation_overwrites_same_key() {
        // Arrange
        let store = FileRowStore::in_memory();

        // Act
        store.upsert_evaluation(7, 1, 10, "80").unwrap();
        store.upsert_evaluation(7, 1, 10, "443").unwrap();
        store.upsert_evaluation(7, 1, 11, "resolves MACs").unwrap();

        // Assert
        let rows = store.get_all_entries(EVALUATIONS_TABLE).unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows.iter().find(|r| r.int("task_id") == Some(10)).unwrap();
        assert_eq!(first.text("answer").as_deref(), Some("443"));
    }

    #[test]
    fn test_writes_survive_reopen() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("proctor_store_{}", Uuid::new_v4()));
        let path = dir.join("exam-data.toml");

        // Act
        {
            let store = FileRowStore::open(&path).unwrap();
            store.upsert_evaluation(7, 1, 10, "80").unwrap();
        }
        let reopened = FileRowStore::open(&path).unwrap();

        // Assert
        let rows = reopened.get_entry_where(EVALUATIONS_TABLE, "student_id", "7").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!path.with_extension("toml.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        assert!(matches!(
            FileRowStore::from_toml("tests = 5"),
            Err(StoreError::Parse(_))
        ));
    }
}
