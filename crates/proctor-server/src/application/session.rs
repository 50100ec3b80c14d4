//! Per-connection protocol handler.
//!
//! # Session lifecycle (for beginners)
//!
//! Every accepted TCP connection gets one [`SessionHandler`].  The network
//! layer reads frames from the socket and feeds each decoded [`Message`] to
//! [`SessionHandler::handle`]; replies go back through the connection's
//! [`SessionLink`], an unbounded queue drained by a writer task that owns the
//! write half of the socket.
//!
//! ```text
//! UNAUTHENTICATED ──AUTH ok──► AUTHENTICATED ──close()──► CLOSED
//!        │  ▲                                               ▲
//!        └──┘ AUTH_ERR (retry allowed)                      │
//!        └──────────────────── close() ─────────────────────┘
//! ```
//!
//! While unauthenticated only `AUTH` is accepted; other requests get an
//! `ERROR` reply.  Tags this server does not know are ignored in every state,
//! so newer clients can talk to older servers.
//!
//! # Closing from two sides
//!
//! A session can end because its own read loop hit EOF or an error, or
//! because the dashboard closed it (end of run, time expiry, shutdown).  The
//! dashboard removes the client from the registry and closes the link; the
//! read loop notices via [`SessionLink::closed`] and calls
//! [`SessionHandler::close`], which then finds nothing left to remove.  Either
//! order is fine and each side's work happens at most once.

use std::net::SocketAddr;
use std::sync::Arc;

use proctor_core::protocol::messages::MessageType;
use proctor_core::{Message, Test};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::application::content::AnswerTarget;
use crate::application::context::{
    ClientId, ClientSession, ConnectionId, DashboardState, SessionStatus,
};
use crate::application::dashboard::Dashboard;

// ── Fixed texts ───────────────────────────────────────────────────────────────

pub const NOT_AUTHENTICATED: &str = "not authenticated";
pub const UNKNOWN_TOKEN: &str = "unknown token";
pub const NOT_HOSTING: &str = "no exam is being hosted";
pub const TIME_IS_UP: &str = "time is up";
pub const NOT_STARTED: &str = "test has not started";
pub const UNKNOWN_TASK: &str = "unknown task";

pub const TEST_PAUSED_TEXT: &str = "The test has been paused by the proctor.";
pub const TEST_RESUMED_TEXT: &str = "The test has been resumed.";
pub const END_TEST_TEXT: &str = "The test has been ended by the proctor.";
pub const TIME_EXPIRED_TEXT: &str = "Time is up. Your answers have been submitted.";

// ── Outbound link ─────────────────────────────────────────────────────────────

/// Item in a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Message(Message),
    /// Flush what came before, then shut the socket down.
    Close,
}

/// Sending side of one connection.
///
/// Cloned into the registry and the handler.  Sends never block; once
/// [`SessionLink::close`] has been called, further sends are refused and
/// nothing queued after the close marker is written.
#[derive(Debug, Clone)]
pub struct SessionLink {
    outbound: mpsc::UnboundedSender<Outgoing>,
    closed: Arc<watch::Sender<bool>>,
}

impl SessionLink {
    /// Creates a link and the receiver the writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        (
            Self {
                outbound,
                closed: Arc::new(closed),
            },
            rx,
        )
    }

    /// Queues a message.  Returns `false` if the link is closed.
    pub fn send(&self, message: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(Outgoing::Message(message)).is_ok()
    }

    /// Marks the link closed and queues the close marker.  Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            let _ = self.outbound.send(Outgoing::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`SessionLink::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

// ── Server → client messages ──────────────────────────────────────────────────

pub(crate) fn auth_ok(token: &str, client_id: ClientId, test: &Test) -> Message {
    Message::from_server(MessageType::AuthOk, token)
        .with_arg("clientId", client_id)
        .with_arg("countOfTasks", test.task_count())
        .with_arg("testName", &test.name)
}

fn auth_err(token: &str, reason: &str) -> Message {
    Message::from_server(MessageType::AuthErr, token).with_arg("reason", reason)
}

fn error_reply(token: &str, reason: &str) -> Message {
    Message::from_server(MessageType::Error, token).with_arg("reason", reason)
}

/// `SEND_TASK` for the task at zero-based `index`, or `None` past the end.
pub(crate) fn task_message(token: &str, test: &Test, index: usize, preview: bool) -> Option<Message> {
    let task = test.task_at(index)?;
    let mut message = Message::from_server(MessageType::SendTask, token)
        .with_arg("taskNumber", index + 1)
        .with_arg("countOfTasks", test.task_count())
        .with_arg("taskId", task.id)
        .with_arg("question", &task.question)
        .with_arg("type", &task.kind)
        .with_arg("answerCount", task.answers.len());
    for (i, answer) in task.answers.iter().enumerate() {
        message.push_arg(format!("answer{i}"), answer);
    }
    Some(message.with_arg("preview", preview))
}

pub(crate) fn overview_message(token: &str, test: &Test) -> Message {
    Message::from_server(MessageType::SendOverview, token)
        .with_arg("overview", test.overview())
        .with_arg("countOfTasks", test.task_count())
}

/// A one-line notice such as `TEST_PAUSED` or `END_TEST`.
pub(crate) fn notice(kind: MessageType, token: &str, text: &str) -> Message {
    Message::from_server(kind, token).with_arg("message", text)
}

pub(crate) fn time_expired(token: &str) -> Message {
    Message::from_server(MessageType::TimeExpired, token)
        .with_arg("message", TIME_EXPIRED_TEXT)
        .with_arg("forceExit", true)
}

/// Sends the task at the session's cursor and advances it; past the last
/// task the overview is sent instead.
pub(crate) fn push_next_task(session: &mut ClientSession) {
    let message = match task_message(&session.token, &session.test, session.current_task_index, false) {
        Some(message) => {
            session.current_task_index += 1;
            message
        }
        None => overview_message(&session.token, &session.test),
    };
    session.send(message);
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn is_client_request(kind: &MessageType) -> bool {
    matches!(
        kind,
        MessageType::Auth
            | MessageType::NextTask
            | MessageType::SendAnswer
            | MessageType::AskOverview
            | MessageType::AskTaskById
            | MessageType::SendDeliver
            | MessageType::Warning
            | MessageType::RaiseHand
            | MessageType::LowerHand
    )
}

// ── Handler ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unauthenticated,
    Authenticated(ClientId),
    Closed,
}

/// Protocol state machine of one connection.
pub struct SessionHandler {
    dashboard: Arc<Dashboard>,
    link: SessionLink,
    connection: ConnectionId,
    peer: SocketAddr,
    phase: Phase,
}

impl SessionHandler {
    /// Registers a freshly accepted connection with the dashboard.
    ///
    /// During shutdown the connection is registered already closed, so the
    /// caller's read loop ends straight away.
    pub async fn attach(dashboard: Arc<Dashboard>, link: SessionLink, peer: SocketAddr) -> Self {
        let connection = {
            let mut ctx = dashboard.lock().await;
            if ctx.shutting_down {
                link.close();
            }
            ctx.register_connection(link.clone())
        };
        debug!("connection from {peer} attached");
        Self {
            dashboard,
            link,
            connection,
            peer,
            phase: Phase::Unauthenticated,
        }
    }

    /// The client id, once authenticated.
    pub fn client_id(&self) -> Option<ClientId> {
        match self.phase {
            Phase::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Processes one inbound message.
    pub async fn handle(&mut self, message: Message) {
        let kind = message.kind();
        let phase = self.phase;
        match phase {
            Phase::Closed => {}
            _ if kind == MessageType::Auth => self.on_auth(&message).await,
            Phase::Unauthenticated if is_client_request(&kind) => {
                debug!("{kind} from {} before AUTH", self.peer);
                self.link.send(error_reply(&message.token, NOT_AUTHENTICATED));
            }
            Phase::Unauthenticated => debug!("ignoring {kind} from {}", self.peer),
            Phase::Authenticated(client_id) => self.on_request(client_id, kind, &message).await,
        }
    }

    /// Ends the session: unregisters the connection and, if authenticated,
    /// removes the client and records it as ended.  Idempotent.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Closed);
        if previous == Phase::Closed {
            return;
        }
        self.link.close();

        let removed = {
            let mut ctx = self.dashboard.lock().await;
            ctx.unregister_connection(self.connection);
            match previous {
                Phase::Authenticated(client_id) => ctx.close_client(client_id),
                _ => None,
            }
        };

        match removed {
            Some(summary) => {
                info!(
                    "{} ({}) disconnected with status {}",
                    summary.client_id, summary.student_name, summary.status
                );
                self.dashboard.mark_changed();
            }
            None => debug!("connection from {} closed", self.peer),
        }
    }

    // ── AUTH ──────────────────────────────────────────────────────────────────

    async fn on_auth(&mut self, message: &Message) {
        let token = if message.token.is_empty() {
            message.arg("token").unwrap_or_default().to_string()
        } else {
            message.token.clone()
        };

        let mut guard = self.dashboard.lock().await;
        let ctx = &mut *guard;

        if let Phase::Authenticated(client_id) = self.phase {
            if let Some(session) = ctx.clients.get(&client_id) {
                session.send(auth_ok(&session.token, client_id, &session.test));
            }
            return;
        }

        let hosting = matches!(ctx.state, DashboardState::Hosting | DashboardState::Running);
        let verdict = match (hosting, ctx.tokens.lookup(&token), ctx.selected_test.as_ref()) {
            (true, Some(holder), Some(test)) => {
                let exhausted = ctx.state == DashboardState::Running
                    && ctx.timer.has_duration()
                    && ctx.timer.remaining_ms() == 0;
                if exhausted {
                    Err(TIME_IS_UP)
                } else {
                    Ok((holder.clone(), Arc::clone(test)))
                }
            }
            (true, None, _) => Err(UNKNOWN_TOKEN),
            _ => Err(NOT_HOSTING),
        };

        let (holder, test) = match verdict {
            Ok(found) => found,
            Err(reason) => {
                drop(guard);
                warn!("AUTH from {} refused: {reason}", self.peer);
                self.link.send(auth_err(&token, reason));
                return;
            }
        };

        let client_id = ctx.allocate_client_id();
        // A student who already delivered rejoins read-only at the end.
        let delivered = ctx.delivered_status(holder.student_id);
        let status = match (delivered, ctx.state, ctx.test_paused) {
            (Some(previous), _, _) => previous,
            (None, DashboardState::Hosting, _) => SessionStatus::Waiting,
            (None, _, true) => SessionStatus::Paused,
            _ => SessionStatus::Running,
        };
        let current_task_index = if delivered.is_some() { test.task_count() } else { 0 };
        let session = ClientSession {
            client_id,
            connection: self.connection,
            token: token.clone(),
            student_id: holder.student_id,
            student_name: holder.full_name(),
            remote_addr: self.peer,
            status,
            test: Arc::clone(&test),
            current_task_index,
            hand_raised: false,
            hand_raised_at: None,
            link: self.link.clone(),
        };
        session.send(auth_ok(&token, client_id, &test));
        ctx.clients.insert(client_id, session);
        drop(guard);

        self.phase = Phase::Authenticated(client_id);
        info!("{client_id} authenticated as {} from {}", holder.full_name(), self.peer);
        self.dashboard.mark_changed();
    }

    // ── Authenticated requests ────────────────────────────────────────────────

    async fn on_request(&mut self, client_id: ClientId, kind: MessageType, message: &Message) {
        let mut guard = self.dashboard.lock().await;
        let ctx = &mut *guard;
        let running = ctx.state == DashboardState::Running;
        let Some(session) = ctx.clients.get_mut(&client_id) else {
            // Already closed by the dashboard; the read loop will stop shortly.
            return;
        };

        let mut changed = false;
        let mut answer = None;

        match kind {
            MessageType::NextTask if !running => {
                session.send(error_reply(&session.token, NOT_STARTED));
            }
            MessageType::NextTask => push_next_task(session),
            MessageType::AskOverview => {
                session.send(overview_message(&session.token, &session.test));
            }
            MessageType::AskTaskById if !running => {
                session.send(error_reply(&session.token, NOT_STARTED));
            }
            MessageType::AskTaskById => {
                let preview = message
                    .arg_i64("taskId")
                    .and_then(|id| session.test.find_task(id))
                    .and_then(|(index, _)| task_message(&session.token, &session.test, index, true));
                match preview {
                    Some(reply) => session.send(reply),
                    None => session.send(error_reply(&session.token, UNKNOWN_TASK)),
                };
            }
            MessageType::SendDeliver => {
                if !session.status.is_submitted() {
                    session.status = SessionStatus::Submitted;
                    changed = true;
                    info!("{client_id} ({}) delivered", session.student_name);
                }
                session.send(overview_message(&session.token, &session.test));
            }
            MessageType::SendAnswer => {
                answer = resolve_answer(session, message);
            }
            MessageType::Warning => {
                let reason = message
                    .arg("reason")
                    .or_else(|| message.arg("message"))
                    .unwrap_or("unspecified");
                let timestamp = message.arg_i64("timestamp").unwrap_or_else(now_millis);
                warn!("{client_id} ({}) reported: {reason}", session.student_name);
                let (id, name) = (session.client_id.to_string(), session.student_name.clone());
                ctx.warnings.append(id, name, reason, timestamp);
                changed = true;
            }
            MessageType::RaiseHand => {
                if !session.hand_raised {
                    session.hand_raised = true;
                    session.hand_raised_at = Some(now_millis());
                    changed = true;
                    info!("{client_id} ({}) raised their hand", session.student_name);
                }
            }
            MessageType::LowerHand => {
                if session.hand_raised {
                    session.hand_raised = false;
                    session.hand_raised_at = None;
                    changed = true;
                }
            }
            other => debug!("ignoring {other} from {client_id}"),
        }
        drop(guard);

        if let Some((target, text)) = answer {
            self.persist_answer(target, text).await;
        }
        if changed {
            self.dashboard.mark_changed();
        }
    }

    async fn persist_answer(&self, target: AnswerTarget, answer: String) {
        let content = self.dashboard.content().clone();
        let result = tokio::task::spawn_blocking(move || content.save_answer(target, &answer)).await;
        match result {
            Ok(Ok(())) => debug!(
                "stored answer of student {} to task {}",
                target.student_id, target.task_id
            ),
            Ok(Err(e)) => warn!(
                "answer of student {} to task {} dropped: {e}",
                target.student_id, target.task_id
            ),
            Err(e) => error!("answer writer panicked: {e}"),
        }
    }
}

/// Works out where a `SEND_ANSWER` goes.  `None` means the answer is dropped.
fn resolve_answer(session: &ClientSession, message: &Message) -> Option<(AnswerTarget, String)> {
    if session.status.is_submitted() {
        debug!("{} already delivered, answer dropped", session.client_id);
        return None;
    }
    let Some(task_id) = message.arg_i64("taskId") else {
        warn!("answer from {} without a task id dropped", session.client_id);
        return None;
    };
    if session.test.find_task(task_id).is_none() {
        warn!(
            "answer from {} for task {task_id} outside test \"{}\" dropped",
            session.client_id, session.test.name
        );
        return None;
    }
    let target = AnswerTarget {
        student_id: session.student_id,
        test_id: session.test.id,
        task_id,
    };
    Some((target, message.arg("answer").unwrap_or_default().to_string()))
}
