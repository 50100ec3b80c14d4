//! Content adapter: maps storage rows to exam content and persists answers.
//!
//! Table layout expected in the storage collaborator:
//!
//! ```text
//! tests        id, name
//! tasks        id, test_id, position, question, answers ("|"-separated), type
//! classes      id, name
//! students     id, class_id, first_name, last_name
//! evaluations  student_id, test_id, task_id, answer
//! ```
//!
//! Read failures from the store are logged and treated as "not found", so
//! operators see a single [`ContentError::NotFound`] whether a row is missing
//! or the store hiccupped.

use std::sync::Arc;

use proctor_core::{Task, Test};
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::ports::{Row, RowExt, RowStore, StoreError};

pub const TESTS_TABLE: &str = "tests";
pub const TASKS_TABLE: &str = "tasks";
pub const CLASSES_TABLE: &str = "classes";
pub const STUDENTS_TABLE: &str = "students";
pub const EVALUATIONS_TABLE: &str = "evaluations";

/// Separator between answer options in the `tasks.answers` column.
const ANSWER_SEPARATOR: char = '|';

/// Error type for content resolution.
#[derive(Debug, Error)]
pub enum ContentError {
    /// A test, class, or task could not be resolved.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
    /// The store rejected a write.
    #[error("storage write failed: {0}")]
    Write(#[from] StoreError),
}

/// How the operator identifies a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelector {
    Id(i64),
    Name(String),
}

impl std::fmt::Display for TestSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestSelector::Id(id) => write!(f, "#{id}"),
            TestSelector::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

/// A class of students.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub id: i64,
    pub name: String,
}

/// A student enrolled in a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl Student {
    /// `"Firstname Lastname"`.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Where an answer goes: one student, one test, one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerTarget {
    pub student_id: i64,
    pub test_id: i64,
    pub task_id: i64,
}

/// Reads exam content from, and writes answers to, a [`RowStore`].
#[derive(Clone)]
pub struct ExamContent {
    store: Arc<dyn RowStore>,
}

impl ExamContent {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Loads a test and its tasks ordered by `position` (then id).
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::NotFound`] if the selector does not resolve.
    pub fn load_test(&self, selector: &TestSelector) -> Result<Test, ContentError> {
        let not_found = || ContentError::NotFound {
            kind: "test",
            key: selector.to_string(),
        };

        let row = match selector {
            TestSelector::Id(id) => read_or_log(self.store.get_entry(TESTS_TABLE, *id)).flatten(),
            TestSelector::Name(name) => read_or_log(self.store.get_entry_where(TESTS_TABLE, "name", name))
                .and_then(|rows| rows.into_iter().next()),
        }
        .ok_or_else(not_found)?;

        let id = row.int("id").ok_or_else(not_found)?;
        let name = row.text("name").unwrap_or_default();

        let mut task_rows = read_or_log(self.store.get_entry_where(
            TASKS_TABLE,
            "test_id",
            &id.to_string(),
        ))
        .unwrap_or_default();
        task_rows.sort_by_key(|r| (r.int("position").unwrap_or(i64::MAX), r.int("id").unwrap_or(0)));

        let tasks: Vec<Task> = task_rows.iter().filter_map(task_from_row).collect();
        debug!("loaded test {name} (#{id}) with {} task(s)", tasks.len());
        Ok(Test { id, name, tasks })
    }

    /// Loads a class and its students ordered by last name, first name.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::NotFound`] if the class does not exist.
    pub fn load_class(&self, class_id: i64) -> Result<(ClassInfo, Vec<Student>), ContentError> {
        let row = read_or_log(self.store.get_entry(CLASSES_TABLE, class_id))
            .flatten()
            .ok_or_else(|| ContentError::NotFound {
                kind: "class",
                key: format!("#{class_id}"),
            })?;
        let class = ClassInfo {
            id: class_id,
            name: row.text("name").unwrap_or_default(),
        };

        let mut students: Vec<Student> = read_or_log(self.store.get_entry_where(
            STUDENTS_TABLE,
            "class_id",
            &class_id.to_string(),
        ))
        .unwrap_or_default()
        .iter()
        .filter_map(|r| {
            Some(Student {
                id: r.int("id")?,
                first_name: r.text("first_name").unwrap_or_default(),
                last_name: r.text("last_name").unwrap_or_default(),
            })
        })
        .collect();
        students.sort_by(|a, b| {
            (a.last_name.as_str(), a.first_name.as_str()).cmp(&(b.last_name.as_str(), b.first_name.as_str()))
        });

        Ok((class, students))
    }

    /// Persists one answer.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::Write`] if the store rejects the write.
    pub fn save_answer(&self, target: AnswerTarget, answer: &str) -> Result<(), ContentError> {
        self.store
            .upsert_evaluation(target.student_id, target.test_id, target.task_id, answer)?;
        Ok(())
    }
}

fn task_from_row(row: &Row) -> Option<Task> {
    let id = row.int("id")?;
    let answers = row
        .text("answers")
        .map(|a| {
            a.split(ANSWER_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(Task {
        id,
        question: row.text("question").unwrap_or_default(),
        answers,
        kind: row.text("type").unwrap_or_else(|| "text".to_string()),
    })
}

/// Logs a storage read failure and maps it to `None`.
fn read_or_log<T>(result: Result<T, StoreError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("storage read failed, treating as not found: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockRowStore, RowValue};

    fn row(pairs: &[(&str, RowValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_load_test_orders_tasks_by_position() {
        // Arrange
        let mut store = MockRowStore::new();
        store
            .expect_get_entry()
            .returning(|_, _| Ok(Some(row(&[("id", RowValue::Int(3)), ("name", "Networking".into())]))));
        store.expect_get_entry_where().returning(|_, _, _| {
            Ok(vec![
                row(&[("id", RowValue::Int(11)), ("position", RowValue::Int(2)), ("question", "second".into())]),
                row(&[
                    ("id", RowValue::Int(10)),
                    ("position", RowValue::Int(1)),
                    ("question", "first".into()),
                    ("answers", "TCP | UDP|".into()),
                    ("type", "choice".into()),
                ]),
            ])
        });
        let content = ExamContent::new(Arc::new(store));

        // Act
        let test = content.load_test(&TestSelector::Id(3)).unwrap();

        // Assert
        assert_eq!(test.name, "Networking");
        assert_eq!(test.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(test.tasks[0].answers, vec!["TCP", "UDP"]);
        assert_eq!(test.tasks[0].kind, "choice");
        assert_eq!(test.tasks[1].kind, "text");
    }

    #[test]
    fn test_load_test_with_store_failure_is_not_found() {
        let mut store = MockRowStore::new();
        store
            .expect_get_entry_where()
            .returning(|_, _, _| Err(StoreError::Poisoned));
        let content = ExamContent::new(Arc::new(store));

        let err = content
            .load_test(&TestSelector::Name("Networking".to_string()))
            .unwrap_err();

        assert!(matches!(err, ContentError::NotFound { kind: "test", .. }));
    }

    #[test]
    fn test_load_class_missing_is_not_found() {
        let mut store = MockRowStore::new();
        store.expect_get_entry().returning(|_, _| Ok(None));
        let content = ExamContent::new(Arc::new(store));

        let err = content.load_class(99).unwrap_err();

        assert!(matches!(err, ContentError::NotFound { kind: "class", .. }));
    }

    #[test]
    fn test_load_class_sorts_students_by_last_name() {
        let mut store = MockRowStore::new();
        store
            .expect_get_entry()
            .returning(|_, _| Ok(Some(row(&[("id", RowValue::Int(1)), ("name", "4B".into())]))));
        store.expect_get_entry_where().returning(|_, _, _| {
            Ok(vec![
                row(&[("id", RowValue::Int(2)), ("first_name", "Zoe".into()), ("last_name", "Berger".into())]),
                row(&[("id", RowValue::Int(1)), ("first_name", "Adam".into()), ("last_name", "Zeller".into())]),
                row(&[("first_name", "No".into()), ("last_name", "Id".into())]),
            ])
        });
        let content = ExamContent::new(Arc::new(store));

        let (class, students) = content.load_class(1).unwrap();

        assert_eq!(class.name, "4B");
        assert_eq!(students.len(), 2, "rows without an id are skipped");
        assert_eq!(students[0].full_name(), "Zoe Berger");
    }

    #[test]
    fn test_save_answer_surfaces_write_failure() {
        let mut store = MockRowStore::new();
        store
            .expect_upsert_evaluation()
            .returning(|_, _, _, _| Err(StoreError::Poisoned));
        let content = ExamContent::new(Arc::new(store));

        let result = content.save_answer(
            AnswerTarget {
                student_id: 1,
                test_id: 2,
                task_id: 3,
            },
            "42",
        );

        assert!(matches!(result, Err(ContentError::Write(_))));
    }
}
