//! UI bridge: exposes the dashboard to whatever front end the proctor uses.
//!
//! The exam server core renders nothing itself.  A desktop window, a web
//! page, or the headless binary's log output all observe and drive the exam
//! through the functions in this module, which delegate to the shared
//! [`Dashboard`].  Nothing in the application layer imports this module.
//!
//! # Data Transfer Objects (DTOs)
//!
//! The dashboard works with internal types (`ClientId`, `SocketAddr`,
//! `Uuid`, `tokio::time::Instant`) that a front end should not have to know
//! about.  DTOs are flat structs that:
//!
//! - contain only JSON-friendly fields (`String`, integers, `bool`),
//! - derive `Serialize`/`Deserialize` so any transport can carry them,
//! - are built from the internal type with a `From<&T>` impl.
//!
//! # `CommandResult<T>` wrapper
//!
//! Every command returns `CommandResult<T>` rather than `Result<T, E>`, so
//! each response has the same shape:
//! `{ success: bool, data: T | null, error: string | null }`.
//! A caller can check `result.success` without knowing the error types.
//!
//! # Change notification
//!
//! Poll [`get_snapshot`] whenever the receiver from
//! [`Dashboard::subscribe_changes`] reports a new version.  The countdown
//! does not bump the version on every tick; poll [`get_timer_status`] on a
//! clock instead.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::content::TestSelector;
use crate::application::context::ClientSummary;
use crate::application::dashboard::Dashboard;
use crate::application::timer::TimerStatus;
use crate::application::tokens::TokenHolder;
use crate::application::warnings::Warning;

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// Dashboard state as shown in the header of a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDto {
    /// `"ROOT"`, `"TEST_SELECTED"`, `"HOSTING"` or `"RUNNING"`.
    pub state: String,
    pub test_paused: bool,
    pub selected_test: Option<String>,
    pub selected_class: Option<String>,
    /// Open TCP connections, authenticated or not.
    pub connection_count: usize,
}

/// Countdown state in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatusDto {
    pub total_seconds: u64,
    pub remaining_seconds: u64,
    pub running: bool,
    pub paused: bool,
    /// `"MM:SS"`, or `"HH:MM:SS"` once an hour or more remains.
    pub remaining_text: String,
}

impl From<&TimerStatus> for TimerStatusDto {
    fn from(s: &TimerStatus) -> Self {
        Self {
            total_seconds: s.total_seconds,
            remaining_seconds: s.remaining_seconds,
            running: s.running,
            paused: s.paused,
            remaining_text: format_clock(s.remaining_seconds),
        }
    }
}

/// One student session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDto {
    /// Display id such as `"Client3"`.
    pub client_id: String,
    pub student_id: i64,
    pub student_name: String,
    pub address: String,
    /// Human-readable status, e.g. `"submitted (time expired)"`.
    pub status: String,
    /// Zero-based index of the task the client is on.
    pub current_task_index: usize,
    pub task_count: usize,
    pub hand_raised: bool,
    pub hand_raised_at: Option<i64>,
}

impl From<&ClientSummary> for ClientDto {
    fn from(s: &ClientSummary) -> Self {
        Self {
            client_id: s.client_id.to_string(),
            student_id: s.student_id,
            student_name: s.student_name.clone(),
            address: s.remote_addr.to_string(),
            status: s.status.label().to_string(),
            current_task_index: s.current_task_index,
            task_count: s.task_count,
            hand_raised: s.hand_raised,
            hand_raised_at: s.hand_raised_at,
        }
    }
}

/// One reported warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningDto {
    /// UUID string, passed back to [`dismiss_warning`].
    pub id: String,
    pub client_id: String,
    pub student_name: String,
    pub message: String,
    pub timestamp_ms: i64,
    /// Local wall-clock time of the report, `HH:MM:SS`.
    pub time: String,
}

impl From<&Warning> for WarningDto {
    fn from(w: &Warning) -> Self {
        let time = Local
            .timestamp_millis_opt(w.timestamp)
            .single()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        Self {
            id: w.id.to_string(),
            client_id: w.client_id.clone(),
            student_name: w.student_name.clone(),
            message: w.message.clone(),
            timestamp_ms: w.timestamp,
            time,
        }
    }
}

/// One issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDto {
    pub token: String,
    pub student_id: i64,
    pub student_name: String,
}

impl From<&TokenHolder> for TokenDto {
    fn from(h: &TokenHolder) -> Self {
        Self {
            token: h.token.clone(),
            student_id: h.student_id,
            student_name: h.full_name(),
        }
    }
}

/// Everything a dashboard view shows, in one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDto {
    pub state: StateDto,
    pub timer: TimerStatusDto,
    pub clients: Vec<ClientDto>,
    pub ended: Vec<ClientDto>,
    pub warnings: Vec<WarningDto>,
    pub tokens: Vec<TokenDto>,
}

/// Unified response wrapper used by every command.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

impl<T: Serialize, E: std::fmt::Display> From<Result<T, E>> for CommandResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

// ── Read commands ─────────────────────────────────────────────────────────────

pub async fn get_state(dashboard: Arc<Dashboard>) -> CommandResult<StateDto> {
    CommandResult::ok(state_dto(&dashboard).await)
}

pub async fn get_timer_status(dashboard: Arc<Dashboard>) -> CommandResult<TimerStatusDto> {
    CommandResult::ok(TimerStatusDto::from(&dashboard.timer_status().await))
}

/// Live clients, raised hands first.
pub async fn get_clients(dashboard: Arc<Dashboard>) -> CommandResult<Vec<ClientDto>> {
    let clients = dashboard.client_summaries().await;
    CommandResult::ok(clients.iter().map(ClientDto::from).collect())
}

/// Clients that left or were closed during the current round.
pub async fn get_ended_clients(dashboard: Arc<Dashboard>) -> CommandResult<Vec<ClientDto>> {
    let ended = dashboard.ended_sessions().await;
    CommandResult::ok(ended.iter().map(ClientDto::from).collect())
}

pub async fn get_warnings(dashboard: Arc<Dashboard>) -> CommandResult<Vec<WarningDto>> {
    let warnings = dashboard.warnings().await;
    CommandResult::ok(warnings.iter().map(WarningDto::from).collect())
}

pub async fn get_tokens(dashboard: Arc<Dashboard>) -> CommandResult<Vec<TokenDto>> {
    let tokens = dashboard.tokens().await;
    CommandResult::ok(tokens.iter().map(TokenDto::from).collect())
}

/// Returns the whole dashboard view at once.
pub async fn get_snapshot(dashboard: Arc<Dashboard>) -> CommandResult<SnapshotDto> {
    CommandResult::ok(snapshot(&dashboard).await)
}

/// Returns [`get_snapshot`] rendered as pretty JSON.
pub async fn get_snapshot_json(dashboard: Arc<Dashboard>) -> CommandResult<String> {
    serde_json::to_string_pretty(&snapshot(&dashboard).await).into()
}

// ── Operation commands ────────────────────────────────────────────────────────

/// Selects a test by its numeric id.
pub async fn select_test_by_id(dashboard: Arc<Dashboard>, test_id: i64) -> CommandResult<String> {
    dashboard
        .select_test(TestSelector::Id(test_id))
        .await
        .map(|test| test.name.clone())
        .into()
}

/// Selects a test by its exact name.
pub async fn select_test_by_name(dashboard: Arc<Dashboard>, name: String) -> CommandResult<String> {
    dashboard
        .select_test(TestSelector::Name(name))
        .await
        .map(|test| test.name.clone())
        .into()
}

/// Issues tokens for a class and opens the exam for connections.
pub async fn prepare_hosting(
    dashboard: Arc<Dashboard>,
    class_id: i64,
    duration_minutes: u64,
) -> CommandResult<Vec<TokenDto>> {
    dashboard
        .prepare_hosting(class_id, duration_minutes)
        .await
        .map(|issued| issued.iter().map(TokenDto::from).collect())
        .into()
}

pub async fn start_test_run(dashboard: Arc<Dashboard>) -> CommandResult<TimerStatusDto> {
    dashboard
        .start_test_run()
        .await
        .map(|s| TimerStatusDto::from(&s))
        .into()
}

pub async fn pause_test_run(dashboard: Arc<Dashboard>) -> CommandResult<TimerStatusDto> {
    dashboard
        .pause_test_run()
        .await
        .map(|s| TimerStatusDto::from(&s))
        .into()
}

pub async fn resume_test_run(dashboard: Arc<Dashboard>) -> CommandResult<TimerStatusDto> {
    dashboard
        .resume_test_run()
        .await
        .map(|s| TimerStatusDto::from(&s))
        .into()
}

pub async fn add_extra_time(dashboard: Arc<Dashboard>, minutes: u64) -> CommandResult<TimerStatusDto> {
    dashboard
        .add_extra_time_minutes(minutes)
        .await
        .map(|s| TimerStatusDto::from(&s))
        .into()
}

pub async fn end_running_test(dashboard: Arc<Dashboard>) -> CommandResult<()> {
    dashboard.end_running_test().await.into()
}

pub async fn abort_hosting(dashboard: Arc<Dashboard>) -> CommandResult<()> {
    dashboard.abort_hosting().await.into()
}

pub async fn reset_to_root(dashboard: Arc<Dashboard>) -> CommandResult<()> {
    dashboard.reset_to_root().await;
    CommandResult::ok(())
}

/// Dismisses a warning by its UUID string.
pub async fn dismiss_warning(dashboard: Arc<Dashboard>, id: String) -> CommandResult<()> {
    let id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(e) => return CommandResult::err(format!("invalid warning id: {e}")),
    };
    if dashboard.dismiss_warning(id).await {
        CommandResult::ok(())
    } else {
        CommandResult::err(format!("no warning with id {id}"))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn state_dto(dashboard: &Dashboard) -> StateDto {
    StateDto {
        state: dashboard.state().await.as_str().to_string(),
        test_paused: dashboard.is_test_paused().await,
        selected_test: dashboard.selected_test_name().await,
        selected_class: dashboard.selected_class().await.map(|c| c.name),
        connection_count: dashboard.connection_count().await,
    }
}

async fn snapshot(dashboard: &Dashboard) -> SnapshotDto {
    SnapshotDto {
        state: state_dto(dashboard).await,
        timer: TimerStatusDto::from(&dashboard.timer_status().await),
        clients: dashboard.client_summaries().await.iter().map(ClientDto::from).collect(),
        ended: dashboard.ended_sessions().await.iter().map(ClientDto::from).collect(),
        warnings: dashboard.warnings().await.iter().map(WarningDto::from).collect(),
        tokens: dashboard.tokens().await.iter().map(TokenDto::from).collect(),
    }
}

fn format_clock(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
