//! Exam content: a test and its ordered tasks.

use serde::{Deserialize, Serialize};

/// Separator between tasks in the overview payload.
pub const OVERVIEW_SEPARATOR: &str = "||";

/// Separator between a task id and its question in the overview payload.
pub const OVERVIEW_PAIR_SEPARATOR: &str = "::";

/// One exam task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Content-layer id of the task.
    pub id: i64,
    pub question: String,
    /// Answer options; empty for free-text tasks.
    pub answers: Vec<String>,
    /// Free-form task kind, e.g. `"choice"` or `"text"`.
    pub kind: String,
}

/// A test snapshot: name plus the tasks in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub id: i64,
    pub name: String,
    pub tasks: Vec<Task>,
}

impl Test {
    /// Number of tasks in the test.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the task at a zero-based position.
    pub fn task_at(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    /// Finds a task by its content-layer id, returning its zero-based
    /// position as well.
    pub fn find_task(&self, task_id: i64) -> Option<(usize, &Task)> {
        self.tasks.iter().enumerate().find(|(_, t)| t.id == task_id)
    }

    /// Renders the overview payload: `id::question` pairs joined by `||`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use proctor_core::{Task, Test};
    ///
    /// let test = Test {
    ///     id: 1,
    ///     name: "Quiz".into(),
    ///     tasks: vec![
    ///         Task { id: 7, question: "Port of HTTP?".into(), answers: vec![], kind: "text".into() },
    ///         Task { id: 9, question: "Is UDP reliable?".into(), answers: vec![], kind: "text".into() },
    ///     ],
    /// };
    /// assert_eq!(test.overview(), "7::Port of HTTP?||9::Is UDP reliable?");
    /// ```
    pub fn overview(&self) -> String {
        self.tasks
            .iter()
            .map(|t| format!("{}{}{}", t.id, OVERVIEW_PAIR_SEPARATOR, t.question))
            .collect::<Vec<_>>()
            .join(OVERVIEW_SEPARATOR)
    }
}
