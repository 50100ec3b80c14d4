//! The dashboard state machine: the one global coordinator of an exam.
//!
//! The proctor drives the exam through the operations on [`Dashboard`]:
//!
//! ```text
//! ROOT ──select_test──► TEST_SELECTED ──prepare_hosting──► HOSTING ──start_test_run──► RUNNING
//!                                                                         pause / resume / extend
//!                                                                         timer expiry (automatic)
//! RUNNING ──end_running_test──► ROOT
//! HOSTING ──abort_hosting──► ROOT          any ──reset_to_root──► ROOT
//! ```
//!
//! # Locking discipline
//!
//! All shared state sits in one [`ServerContext`] behind a
//! `tokio::sync::Mutex`.  Each operation:
//!
//! 1. reads what it needs from storage *before* taking the lock,
//! 2. validates the current state and applies the transition under the lock
//!    (outbound messages are queued, never written, while it is held),
//! 3. releases the lock, then does slow work such as archiving the token
//!    list, and finally bumps the change counter.
//!
//! An operation called in the wrong state returns
//! [`DashboardError::InvalidState`] and changes nothing.
//!
//! # Timer task
//!
//! While a timed run is counting down, one tokio task ticks the
//! [`ExamTimer`](crate::application::timer::ExamTimer).  The task only holds a
//! `Weak<Dashboard>`, so it can never keep a dropped dashboard alive, and it
//! is aborted whenever the countdown must stop (pause, end, abort, reset,
//! shutdown).  Each spawn gets a fresh generation number; a tick that wakes up
//! after being superseded sees a stale generation and exits untouched.
//!
//! # Change notification
//!
//! UI layers subscribe with [`Dashboard::subscribe_changes`] and receive a
//! version number that increases whenever the state, the client list, the
//! warnings, or a hand-raise flag change.

use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use proctor_core::protocol::discovery::LEGACY_TOKEN;
use proctor_core::protocol::messages::MessageType;
use proctor_core::{DiscoveryAnnouncement, Test};
use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::content::{ClassInfo, ContentError, ExamContent, TestSelector};
use crate::application::context::{
    ClientId, ClientSummary, DashboardState, ServerContext, SessionStatus,
};
use crate::application::ports::{DiscoveryService, TokenArchive, TokenListEntry};
use crate::application::session::{
    notice, push_next_task, time_expired, END_TEST_TEXT, TEST_PAUSED_TEXT, TEST_RESUMED_TEXT,
};
use crate::application::timer::{minutes_to_millis, TickOutcome, TimerStatus};
use crate::application::tokens::TokenHolder;
use crate::application::warnings::Warning;

/// Error type for dashboard operations.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while the dashboard is in state {state}")]
    InvalidState {
        operation: &'static str,
        state: DashboardState,
    },
    /// The selected test or class does not exist.
    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Static settings of a dashboard, taken from configuration at startup.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    /// Display name advertised in discovery packets.
    pub server_name: String,
    pub description: String,
    /// Address clients should connect to.
    pub advertised_ip: Ipv4Addr,
    pub tcp_port: u16,
    /// Period of the countdown tick.
    pub tick_interval: Duration,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            server_name: "Exam Server".to_string(),
            description: "Classroom exam".to_string(),
            advertised_ip: Ipv4Addr::LOCALHOST,
            tcp_port: 5050,
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// The global exam coordinator.  Create one with [`Dashboard::new`] and share
/// the returned `Arc` with the acceptor, the UI bridge, and every session.
pub struct Dashboard {
    context: Mutex<ServerContext>,
    content: ExamContent,
    discovery: Arc<dyn DiscoveryService>,
    archive: Arc<dyn TokenArchive>,
    settings: DashboardSettings,
    changes: watch::Sender<u64>,
    this: Weak<Dashboard>,
}

impl Dashboard {
    pub fn new(
        settings: DashboardSettings,
        content: ExamContent,
        discovery: Arc<dyn DiscoveryService>,
        archive: Arc<dyn TokenArchive>,
    ) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        Arc::new_cyclic(|this| Self {
            context: Mutex::new(ServerContext::new()),
            content,
            discovery,
            archive,
            settings,
            changes,
            this: this.clone(),
        })
    }

    pub fn settings(&self) -> &DashboardSettings {
        &self.settings
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ServerContext> {
        self.context.lock().await
    }

    pub(crate) fn content(&self) -> &ExamContent {
        &self.content
    }

    /// Bumps the change version seen by [`Dashboard::subscribe_changes`].
    pub(crate) fn mark_changed(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Returns a receiver of the change version.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    /// `ROOT | TEST_SELECTED → TEST_SELECTED`: loads the test to run.
    ///
    /// # Errors
    ///
    /// [`DashboardError::InvalidState`] outside ROOT/TEST_SELECTED and
    /// [`DashboardError::Content`] when the selector does not resolve.
    pub async fn select_test(&self, selector: TestSelector) -> Result<Arc<Test>, DashboardError> {
        const ALLOWED: &[DashboardState] = &[DashboardState::Root, DashboardState::TestSelected];
        self.check_state("select test", ALLOWED).await?;

        let test = Arc::new(self.content.load_test(&selector)?);

        let mut ctx = self.context.lock().await;
        require(&ctx, "select test", ALLOWED)?;
        ctx.selected_test = Some(Arc::clone(&test));
        ctx.state = DashboardState::TestSelected;
        drop(ctx);

        info!("selected test \"{}\" with {} task(s)", test.name, test.task_count());
        self.mark_changed();
        Ok(test)
    }

    /// `TEST_SELECTED → HOSTING`: issues tokens for the class, configures
    /// the timer and starts LAN discovery.
    ///
    /// Returns the issued tokens in class order.  Failing to archive the
    /// token list or to start discovery is logged and does not fail the
    /// transition.
    ///
    /// # Errors
    ///
    /// [`DashboardError::InvalidState`] outside TEST_SELECTED and
    /// [`DashboardError::Content`] when the class does not exist.
    pub async fn prepare_hosting(
        &self,
        class_id: i64,
        duration_minutes: u64,
    ) -> Result<Vec<TokenHolder>, DashboardError> {
        const ALLOWED: &[DashboardState] = &[DashboardState::TestSelected];
        self.check_state("prepare hosting", ALLOWED).await?;

        let (class, students) = self.content.load_class(class_id)?;

        let mut guard = self.context.lock().await;
        let ctx = &mut *guard;
        require(ctx, "prepare hosting", ALLOWED)?;

        let issued = ctx.tokens.regenerate(&students);
        ctx.timer.configure(minutes_to_millis(duration_minutes));
        ctx.selected_class = Some(class.clone());
        ctx.state = DashboardState::Hosting;

        let test_name = ctx.selected_test.as_ref().map(|t| t.name.clone()).unwrap_or_default();
        if let Err(e) = self.discovery.start(self.announcement(&test_name)) {
            error!("LAN discovery could not be started, clients must connect manually: {e}");
        }
        drop(guard);

        info!(
            "hosting \"{test_name}\" for class {} with {} token(s), {duration_minutes} minute(s)",
            class.name,
            issued.len()
        );
        self.archive_tokens(&class.name, &issued).await;
        self.mark_changed();
        Ok(issued)
    }

    /// `HOSTING → RUNNING`: stops discovery, sends every connected client its
    /// first task and starts the countdown if a duration was configured.
    pub async fn start_test_run(&self) -> Result<TimerStatus, DashboardError> {
        let mut guard = self.context.lock().await;
        let ctx = &mut *guard;
        require(ctx, "start the test run", &[DashboardState::Hosting])?;

        self.discovery.stop();
        ctx.state = DashboardState::Running;
        ctx.test_paused = false;

        for session in ctx.clients.values_mut() {
            session.current_task_index = 0;
            session.status = SessionStatus::Running;
            push_next_task(session);
        }

        let now = Instant::now();
        if ctx.timer.start(now) {
            self.spawn_timer(ctx);
        }
        let status = ctx.timer.status(now);
        let clients = ctx.clients.len();
        drop(guard);

        info!(
            "test run started with {clients} client(s), {} s on the clock",
            status.total_seconds
        );
        self.mark_changed();
        Ok(status)
    }

    /// Freezes the countdown and tells every client the test is paused.
    ///
    /// Pausing an already paused run changes nothing.
    pub async fn pause_test_run(&self) -> Result<TimerStatus, DashboardError> {
        let mut guard = self.context.lock().await;
        let ctx = &mut *guard;
        require(ctx, "pause the test run", &[DashboardState::Running])?;

        let now = Instant::now();
        if ctx.test_paused {
            return Ok(ctx.timer.status(now));
        }

        ctx.cancel_timer_task();
        let outcome = ctx.timer.pause(now);
        ctx.test_paused = true;
        if outcome == TickOutcome::Expired {
            self.expire_sessions(ctx);
        }
        for session in ctx.clients.values_mut() {
            if !session.status.is_submitted() {
                session.status = SessionStatus::Paused;
            }
        }
        ctx.broadcast(|token| notice(MessageType::TestPaused, token, TEST_PAUSED_TEXT));
        let status = ctx.timer.status(now);
        drop(guard);

        info!("test run paused with {} s remaining", status.remaining_seconds);
        self.mark_changed();
        Ok(status)
    }

    /// Lifts a pause; the countdown continues if time remains.
    ///
    /// Resuming a run that is not paused changes nothing.
    pub async fn resume_test_run(&self) -> Result<TimerStatus, DashboardError> {
        let mut guard = self.context.lock().await;
        let ctx = &mut *guard;
        require(ctx, "resume the test run", &[DashboardState::Running])?;

        let now = Instant::now();
        if !ctx.test_paused {
            return Ok(ctx.timer.status(now));
        }

        ctx.test_paused = false;
        if ctx.timer.resume(now) {
            self.spawn_timer(ctx);
        }
        for session in ctx.clients.values_mut() {
            if session.status == SessionStatus::Paused {
                session.status = SessionStatus::Running;
            }
        }
        ctx.broadcast(|token| notice(MessageType::TestResumed, token, TEST_RESUMED_TEXT));
        let status = ctx.timer.status(now);
        drop(guard);

        info!("test run resumed with {} s remaining", status.remaining_seconds);
        self.mark_changed();
        Ok(status)
    }

    /// Adds minutes to the run.  If time had already run out and the run is
    /// not paused, the countdown starts again.
    pub async fn add_extra_time_minutes(&self, minutes: u64) -> Result<TimerStatus, DashboardError> {
        let mut guard = self.context.lock().await;
        let ctx = &mut *guard;
        require(ctx, "add extra time", &[DashboardState::Running])?;

        let now = Instant::now();
        let running = ctx.timer.extend(minutes_to_millis(minutes), now);
        if running && ctx.timer_task.is_none() {
            self.spawn_timer(ctx);
        }
        let status = ctx.timer.status(now);
        drop(guard);

        info!("added {minutes} minute(s), {} s remaining", status.remaining_seconds);
        self.mark_changed();
        Ok(status)
    }

    /// `RUNNING → ROOT`: tells every client the test is over and clears the
    /// round.
    pub async fn end_running_test(&self) -> Result<(), DashboardError> {
        let mut ctx = self.context.lock().await;
        require(&ctx, "end the test run", &[DashboardState::Running])?;

        ctx.broadcast(|token| notice(MessageType::EndTest, token, END_TEST_TEXT));
        self.discovery.stop();
        ctx.return_to_root();
        drop(ctx);

        info!("test run ended");
        self.mark_changed();
        Ok(())
    }

    /// `HOSTING → ROOT`: cancels a round that has not started.
    pub async fn abort_hosting(&self) -> Result<(), DashboardError> {
        let mut ctx = self.context.lock().await;
        require(&ctx, "abort hosting", &[DashboardState::Hosting])?;

        self.discovery.stop();
        ctx.return_to_root();
        drop(ctx);

        info!("hosting aborted");
        self.mark_changed();
        Ok(())
    }

    /// Returns to ROOT from any state.
    pub async fn reset_to_root(&self) {
        let mut ctx = self.context.lock().await;
        let previous = ctx.state;
        self.discovery.stop();
        ctx.return_to_root();
        drop(ctx);

        info!("dashboard reset from {previous} to ROOT");
        self.mark_changed();
    }

    /// Stops discovery, cancels the timer and closes every connection.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut ctx = self.context.lock().await;
        let first = !ctx.shutting_down;
        ctx.shutting_down = true;
        self.discovery.stop();
        ctx.return_to_root();
        ctx.close_all_connections();
        drop(ctx);

        if first {
            info!("dashboard shut down");
            self.mark_changed();
        }
    }

    /// Removes a warning.  Returns `false` for an unknown id.
    pub async fn dismiss_warning(&self, id: Uuid) -> bool {
        let removed = self.context.lock().await.warnings.dismiss(id);
        if removed {
            self.mark_changed();
        }
        removed
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub async fn state(&self) -> DashboardState {
        self.context.lock().await.state
    }

    pub async fn is_test_paused(&self) -> bool {
        self.context.lock().await.test_paused
    }

    pub async fn timer_status(&self) -> TimerStatus {
        self.context.lock().await.timer.status(Instant::now())
    }

    /// Live clients, raised hands first.
    pub async fn client_summaries(&self) -> Vec<ClientSummary> {
        self.context.lock().await.client_summaries()
    }

    /// Clients that left or were closed during the current round.
    pub async fn ended_sessions(&self) -> Vec<ClientSummary> {
        self.context.lock().await.ended.clone()
    }

    pub async fn warnings(&self) -> Vec<Warning> {
        self.context.lock().await.warnings.list().to_vec()
    }

    /// Tokens of the current round in class order.
    pub async fn tokens(&self) -> Vec<TokenHolder> {
        self.context.lock().await.tokens.entries().to_vec()
    }

    pub async fn selected_test_name(&self) -> Option<String> {
        self.context.lock().await.selected_test.as_ref().map(|t| t.name.clone())
    }

    pub async fn selected_class(&self) -> Option<ClassInfo> {
        self.context.lock().await.selected_class.clone()
    }

    /// Whether a countdown tick task is currently scheduled.
    pub async fn has_scheduled_timer(&self) -> bool {
        self.context.lock().await.has_scheduled_timer()
    }

    /// Number of open TCP connections, authenticated or not.
    pub async fn connection_count(&self) -> usize {
        self.context.lock().await.connections.len()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn check_state(
        &self,
        operation: &'static str,
        allowed: &[DashboardState],
    ) -> Result<(), DashboardError> {
        require(&*self.context.lock().await, operation, allowed)
    }

    fn announcement(&self, test_name: &str) -> DiscoveryAnnouncement {
        DiscoveryAnnouncement {
            ipv4: self.settings.advertised_ip,
            name: self.settings.server_name.clone(),
            description: self.settings.description.clone(),
            tcp_port: self.settings.tcp_port,
            token: LEGACY_TOKEN.to_string(),
            test_name: test_name.to_string(),
        }
    }

    async fn archive_tokens(&self, class_name: &str, issued: &[TokenHolder]) {
        let entries: Vec<TokenListEntry> = issued
            .iter()
            .map(|h| TokenListEntry {
                student_name: h.full_name(),
                student_id: h.student_id,
                token: h.token.clone(),
            })
            .collect();
        let archive = Arc::clone(&self.archive);
        let class_name = class_name.to_string();

        match tokio::task::spawn_blocking(move || archive.archive(&class_name, &entries)).await {
            Ok(Ok(path)) => info!("token list written to {}", path.display()),
            Ok(Err(e)) => error!("failed to write token list: {e}"),
            Err(e) => error!("token list writer panicked: {e}"),
        }
    }

    /// Replaces any tick task with a fresh one.
    fn spawn_timer(&self, ctx: &mut ServerContext) {
        ctx.cancel_timer_task();
        let generation = ctx.timer_generation;
        let dashboard = self.this.clone();
        let period = self.settings.tick_interval;

        ctx.timer_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(dashboard) = dashboard.upgrade() else {
                    break;
                };
                if !dashboard.on_tick(generation).await {
                    break;
                }
            }
        }));
        debug!("timer task spawned (generation {generation})");
    }

    /// One countdown step.  Returns whether the tick task should keep going.
    async fn on_tick(&self, generation: u64) -> bool {
        let mut guard = self.context.lock().await;
        let ctx = &mut *guard;
        if ctx.timer_generation != generation {
            return false;
        }
        if ctx.state != DashboardState::Running || ctx.test_paused {
            ctx.timer_task = None;
            return false;
        }

        match ctx.timer.tick(Instant::now()) {
            TickOutcome::Ticking => true,
            TickOutcome::Idle => {
                ctx.timer_task = None;
                false
            }
            TickOutcome::Expired => {
                ctx.timer_task = None;
                self.expire_sessions(ctx);
                drop(guard);
                self.mark_changed();
                false
            }
        }
    }

    /// Forces every session that has not delivered to submit, tells it why,
    /// and disconnects it.  The dashboard stays RUNNING.
    fn expire_sessions(&self, ctx: &mut ServerContext) {
        let pending: Vec<ClientId> = ctx
            .clients
            .values()
            .filter(|s| !s.status.is_submitted())
            .map(|s| s.client_id)
            .collect();

        for id in &pending {
            if let Some(session) = ctx.clients.get_mut(id) {
                session.status = SessionStatus::SubmittedTimeExpired;
                session.current_task_index = session.test.task_count();
                session.send(time_expired(&session.token));
            }
            ctx.close_client(*id);
        }

        if pending.is_empty() {
            info!("time is up, every client had already delivered");
        } else {
            warn!("time is up, {} client(s) force-submitted and disconnected", pending.len());
        }
    }
}

fn require(
    ctx: &ServerContext,
    operation: &'static str,
    allowed: &[DashboardState],
) -> Result<(), DashboardError> {
    if allowed.contains(&ctx.state) {
        Ok(())
    } else {
        Err(DashboardError::InvalidState {
            operation,
            state: ctx.state,
        })
    }
}
