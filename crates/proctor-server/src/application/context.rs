//! The process-wide `ServerContext` and the per-client session records it owns.
//!
//! # Ownership model (for beginners)
//!
//! There is exactly one `ServerContext`.  It lives inside the
//! [`Dashboard`](crate::application::dashboard::Dashboard) behind a single
//! `tokio::sync::Mutex`, and every operation that reads or changes shared
//! state (the dashboard state machine, the per-connection protocol handlers,
//! the timer task) takes that lock for a short, I/O-free critical section.
//!
//! Sessions never hold a socket here.  A [`ClientSession`] keeps a
//! [`SessionLink`]: the sending end of its connection's outbound queue.
//! Pushing a message is a non-blocking channel send, so broadcasting to the
//! whole class while holding the lock cannot stall on a slow client.
//!
//! ```text
//!  ServerContext
//!  ├── state / test_paused / selection
//!  ├── tokens        TokenRegistry
//!  ├── clients       ClientId → ClientSession ──► SessionLink ──► writer task ──► socket
//!  ├── connections   ConnectionId → SessionLink (authenticated or not)
//!  ├── ended         summaries of sessions closed during this round
//!  ├── warnings      WarningLog
//!  └── timer         ExamTimer + handle of the tick task
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use proctor_core::{Message, Test};
use tokio::task::JoinHandle;

use crate::application::content::ClassInfo;
use crate::application::session::SessionLink;
use crate::application::timer::ExamTimer;
use crate::application::tokens::TokenRegistry;
use crate::application::warnings::WarningLog;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Identifier assigned to a client at successful authentication.
///
/// Displays as `"Client7"`.  Numbers come from a per-process counter and are
/// never reused, even across hosting rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client{}", self.0)
    }
}

/// Identifier of an accepted TCP connection, authenticated or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

// ── Dashboard state ───────────────────────────────────────────────────────────

/// Lifecycle state of the exam dashboard.
///
/// ```text
/// ROOT ──select──► TEST_SELECTED ──prepare──► HOSTING ──start──► RUNNING
///  ▲                    │  ▲ select               │                 │
///  └────────────────────┴──┴──── abort / reset ◄──┴─── end / reset ◄┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DashboardState {
    #[default]
    Root,
    TestSelected,
    Hosting,
    Running,
}

impl DashboardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DashboardState::Root => "ROOT",
            DashboardState::TestSelected => "TEST_SELECTED",
            DashboardState::Hosting => "HOSTING",
            DashboardState::Running => "RUNNING",
        }
    }
}

impl std::fmt::Display for DashboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// Lifecycle label of an authenticated session, shown to the proctor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Authenticated while hosting; the run has not started.
    Waiting,
    Running,
    Paused,
    /// The student delivered their answers.
    Submitted,
    /// The timer ran out and the server forced the submission.
    SubmittedTimeExpired,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Submitted => "submitted",
            SessionStatus::SubmittedTimeExpired => "submitted (time expired)",
        }
    }

    /// Whether the session has reached a submitted state.
    pub fn is_submitted(&self) -> bool {
        matches!(self, SessionStatus::Submitted | SessionStatus::SubmittedTimeExpired)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry record of an authenticated client.
#[derive(Debug)]
pub struct ClientSession {
    pub client_id: ClientId,
    pub connection: ConnectionId,
    pub token: String,
    pub student_id: i64,
    pub student_name: String,
    pub remote_addr: SocketAddr,
    pub status: SessionStatus,
    /// Snapshot bound at authentication.
    pub test: Arc<Test>,
    /// Index of the task the next `NEXT_TASK` will send.
    pub current_task_index: usize,
    pub hand_raised: bool,
    /// Milliseconds since the Unix epoch of the latest raise.
    pub hand_raised_at: Option<i64>,
    pub(crate) link: SessionLink,
}

impl ClientSession {
    /// Queues a message for this client.  Returns `false` once closed.
    pub fn send(&self, message: Message) -> bool {
        self.link.send(message)
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            client_id: self.client_id,
            student_id: self.student_id,
            student_name: self.student_name.clone(),
            remote_addr: self.remote_addr,
            status: self.status,
            current_task_index: self.current_task_index,
            task_count: self.test.task_count(),
            hand_raised: self.hand_raised,
            hand_raised_at: self.hand_raised_at,
        }
    }
}

/// Read-only projection of a session for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSummary {
    pub client_id: ClientId,
    pub student_id: i64,
    pub student_name: String,
    pub remote_addr: SocketAddr,
    pub status: SessionStatus,
    pub current_task_index: usize,
    pub task_count: usize,
    pub hand_raised: bool,
    pub hand_raised_at: Option<i64>,
}

/// Orders summaries for display: raised hands first (most recent raise
/// first, then client number), then everyone else by client number.
pub fn sort_for_display(summaries: &mut [ClientSummary]) {
    summaries.sort_by(|a, b| {
        b.hand_raised
            .cmp(&a.hand_raised)
            .then_with(|| {
                if a.hand_raised && b.hand_raised {
                    b.hand_raised_at.cmp(&a.hand_raised_at)
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .then_with(|| a.client_id.cmp(&b.client_id))
    });
}

// ── Context ───────────────────────────────────────────────────────────────────

/// All shared mutable state of the server.
#[derive(Debug, Default)]
pub struct ServerContext {
    pub state: DashboardState,
    pub test_paused: bool,
    pub selected_test: Option<Arc<Test>>,
    pub selected_class: Option<ClassInfo>,
    pub tokens: TokenRegistry,
    pub clients: BTreeMap<ClientId, ClientSession>,
    pub(crate) connections: HashMap<ConnectionId, SessionLink>,
    /// Sessions closed during the current round, in closing order.
    pub ended: Vec<ClientSummary>,
    pub warnings: WarningLog,
    pub timer: ExamTimer,
    pub(crate) timer_task: Option<JoinHandle<()>>,
    /// Bumped on every timer (re)spawn; a tick task whose generation is
    /// stale exits without touching state.
    pub(crate) timer_generation: u64,
    pub(crate) shutting_down: bool,
    next_client: u64,
    next_connection: u64,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next `ClientN`, starting at `Client1`.
    pub fn allocate_client_id(&mut self) -> ClientId {
        self.next_client += 1;
        ClientId(self.next_client)
    }

    pub(crate) fn register_connection(&mut self, link: SessionLink) -> ConnectionId {
        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        self.connections.insert(id, link);
        id
    }

    pub(crate) fn unregister_connection(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Whether a tick task is currently scheduled.
    pub fn has_scheduled_timer(&self) -> bool {
        self.timer_task.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Aborts the tick task, if any.
    pub(crate) fn cancel_timer_task(&mut self) {
        self.timer_generation += 1;
        if let Some(handle) = self.timer_task.take() {
            handle.abort();
        }
    }

    /// Queues `build(token)` for every registered client.
    pub fn broadcast(&self, build: impl Fn(&str) -> Message) {
        for session in self.clients.values() {
            session.send(build(&session.token));
        }
    }

    /// Removes a client, closes its connection and records it as ended.
    ///
    /// Returns `None` if the client was already gone, which makes closing
    /// idempotent across the dashboard and the session's own read loop.
    pub fn close_client(&mut self, id: ClientId) -> Option<ClientSummary> {
        let mut session = self.clients.remove(&id)?;
        session.hand_raised = false;
        session.hand_raised_at = None;
        session.link.close();
        let summary = session.summary();
        if self.state != DashboardState::Root {
            self.ended.push(summary.clone());
        }
        Some(summary)
    }

    /// Closes every registered client.  Returns how many were closed.
    pub fn close_all_clients(&mut self) -> usize {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.close_client(id)).count()
    }

    /// Closes every connection, including ones that never authenticated.
    pub(crate) fn close_all_connections(&mut self) {
        self.close_all_clients();
        for link in self.connections.values() {
            link.close();
        }
        self.connections.clear();
    }

    /// Status of an earlier delivery by `student_id` in this round, if any.
    ///
    /// Looks at live sessions and at sessions already closed, so a student
    /// who delivered and reconnects stays submitted.
    pub fn delivered_status(&self, student_id: i64) -> Option<SessionStatus> {
        self.clients
            .values()
            .map(ClientSession::summary)
            .chain(self.ended.iter().cloned())
            .filter(|s| s.student_id == student_id)
            .map(|s| s.status)
            .find(SessionStatus::is_submitted)
    }

    /// Live sessions in display order.
    pub fn client_summaries(&self) -> Vec<ClientSummary> {
        let mut summaries: Vec<ClientSummary> = self.clients.values().map(ClientSession::summary).collect();
        sort_for_display(&mut summaries);
        summaries
    }

    /// Drops everything scoped to a round and returns to ROOT.
    ///
    /// The caller is responsible for stopping discovery.
    pub(crate) fn return_to_root(&mut self) {
        self.cancel_timer_task();
        // Sessions closed at ROOT are not recorded as ended.
        self.state = DashboardState::Root;
        self.close_all_clients();
        self.ended.clear();
        self.tokens.clear();
        self.warnings.clear();
        self.timer.reset();
        self.test_paused = false;
        self.selected_test = None;
        self.selected_class = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(n: u64, raised_at: Option<i64>) -> ClientSummary {
        ClientSummary {
            client_id: ClientId(n),
            student_id: n as i64,
            student_name: format!("Student {n}"),
            remote_addr: "127.0.0.1:4000".parse().unwrap(),
            status: SessionStatus::Running,
            current_task_index: 0,
            task_count: 3,
            hand_raised: raised_at.is_some(),
            hand_raised_at: raised_at,
        }
    }

    #[test]
    fn test_client_id_displays_with_prefix() {
        assert_eq!(ClientId(7).to_string(), "Client7");
    }

    #[test]
    fn test_client_ids_are_monotonic() {
        let mut ctx = ServerContext::new();
        assert_eq!(ctx.allocate_client_id(), ClientId(1));
        assert_eq!(ctx.allocate_client_id(), ClientId(2));
    }

    #[test]
    fn test_sort_puts_most_recent_raised_hand_first() {
        // Arrange
        let mut list = vec![
            summary(1, None),
            summary(2, Some(100)),
            summary(3, None),
            summary(4, Some(300)),
            summary(5, Some(100)),
        ];

        // Act
        sort_for_display(&mut list);

        // Assert
        let order: Vec<u64> = list.iter().map(|s| s.client_id.0).collect();
        assert_eq!(order, vec![4, 2, 5, 1, 3]);
    }

    #[test]
    fn test_client_ids_order_numerically_not_lexically() {
        let mut list = vec![summary(10, None), summary(9, None)];
        sort_for_display(&mut list);
        assert_eq!(list[0].client_id, ClientId(9));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(SessionStatus::SubmittedTimeExpired.to_string(), "submitted (time expired)");
        assert!(SessionStatus::Submitted.is_submitted());
        assert!(!SessionStatus::Paused.is_submitted());
    }

    #[test]
    fn test_delivered_status_is_found_in_ended_sessions() {
        // Arrange
        let mut ctx = ServerContext::new();
        let mut delivered = summary(1, None);
        delivered.status = SessionStatus::SubmittedTimeExpired;
        ctx.ended.push(summary(2, None));
        ctx.ended.push(delivered);

        // Act / Assert
        assert_eq!(ctx.delivered_status(1), Some(SessionStatus::SubmittedTimeExpired));
        assert_eq!(ctx.delivered_status(2), None);
        assert_eq!(ctx.delivered_status(3), None);
    }

    #[test]
    fn test_close_unknown_client_is_noop() {
        let mut ctx = ServerContext::new();
        assert!(ctx.close_client(ClientId(42)).is_none());
        assert!(ctx.ended.is_empty());
    }
}
