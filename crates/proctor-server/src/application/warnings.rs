//! Append-only log of client-reported warnings.
//!
//! Clients report suspicious events (focus lost, forbidden shortcut, ...)
//! with a `WARNING` message.  Warnings accumulate until the proctor dismisses
//! them one by one.

use uuid::Uuid;

/// One reported warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub id: Uuid,
    /// Display id of the reporting client, e.g. `"Client3"`.
    pub client_id: String,
    pub student_name: String,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct WarningLog {
    entries: Vec<Warning>,
}

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a warning and returns its generated id.
    pub fn append(
        &mut self,
        client_id: impl Into<String>,
        student_name: impl Into<String>,
        message: impl Into<String>,
        timestamp: i64,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.push(Warning {
            id,
            client_id: client_id.into(),
            student_name: student_name.into(),
            message: message.into(),
            timestamp,
        });
        id
    }

    /// Removes the warning with `id`.  Returns `false` if no such warning
    /// exists.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|w| w.id != id);
        self.entries.len() != before
    }

    /// Warnings in the order they were reported.
    pub fn list(&self) -> &[Warning] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
