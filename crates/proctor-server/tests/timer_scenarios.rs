//! Integration tests for the exam countdown.
//!
//! # Purpose
//!
//! These tests run whole timed exams on tokio's paused clock
//! (`start_paused = true`): `sleep` advances virtual time instantly, and the
//! dashboard's tick task fires exactly as it would in real time.  They
//! verify:
//!
//! - Expiry force-submits and disconnects every client that has not
//!   delivered, while the dashboard stays RUNNING.
//! - Pausing freezes the remaining time and resuming continues from it.
//! - Extra time extends a running countdown and restarts an exhausted one.

mod common;

use std::time::Duration;

use common::*;
use proctor_core::protocol::messages::MessageType;
use proctor_server::application::context::{DashboardState, SessionStatus};
use proctor_server::application::session::TIME_IS_UP;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_one_minute_run_expires_after_sixty_seconds() {
    // Arrange
    let dashboard = make_dashboard();
    let (ada, alan) = host(&dashboard, 1).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;

    // Act
    let started = dashboard.start_test_run().await.unwrap();
    assert_eq!(client.recv().await.kind(), MessageType::SendTask);
    sleep(Duration::from_secs(61)).await;

    // Assert: the client is told why, then disconnected.
    assert_eq!(started.total_seconds, 60);
    assert!(started.running);
    let expired = client.recv().await;
    assert_eq!(expired.kind(), MessageType::TimeExpired);
    assert_eq!(expired.arg("forceExit"), Some("true"));
    client.expect_closed().await;

    assert_eq!(dashboard.state().await, DashboardState::Running);
    assert!(dashboard.client_summaries().await.is_empty());
    assert!(!dashboard.has_scheduled_timer().await);
    let ended = dashboard.ended_sessions().await;
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].status, SessionStatus::SubmittedTimeExpired);
    assert_eq!(ended[0].current_task_index, ended[0].task_count);

    let timer = dashboard.timer_status().await;
    assert_eq!(timer.remaining_seconds, 0);
    assert!(!timer.running);

    // A late joiner is turned away once time is up.
    let mut late = TestClient::connect(&dashboard);
    let refused = late.auth(&alan).await;
    assert_eq!(refused.kind(), MessageType::AuthErr);
    assert_eq!(refused.arg("reason"), Some(TIME_IS_UP));

    client.disconnect().await;
    late.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_not_yet_expired_at_fifty_nine_seconds() {
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 1).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;
    dashboard.start_test_run().await.unwrap();
    client.recv().await;

    sleep(Duration::from_secs(59)).await;

    let timer = dashboard.timer_status().await;
    assert_eq!(timer.remaining_seconds, 1);
    assert!(timer.running);
    assert_eq!(dashboard.client_summaries().await.len(), 1);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_delivered_client_stays_connected_at_expiry() {
    // Arrange
    let dashboard = make_dashboard();
    let (ada, alan) = host(&dashboard, 1).await;
    let mut done = TestClient::connect(&dashboard);
    let mut working = TestClient::connect(&dashboard);
    done.auth(&ada).await;
    working.auth(&alan).await;
    dashboard.start_test_run().await.unwrap();
    done.recv().await;
    working.recv().await;
    done.send(MessageType::SendDeliver, &ada, &[]).await;
    assert_eq!(done.recv().await.kind(), MessageType::SendOverview);

    // Act
    sleep(Duration::from_secs(61)).await;

    // Assert
    assert_eq!(working.recv().await.kind(), MessageType::TimeExpired);
    working.expect_closed().await;
    let clients = dashboard.client_summaries().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].status, SessionStatus::Submitted);

    done.disconnect().await;
    working.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_freezes_remaining_time_and_resume_continues() {
    // Arrange
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 1).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;
    dashboard.start_test_run().await.unwrap();
    client.recv().await;
    sleep(Duration::from_secs(10)).await;

    // Act: pause for a five second gap.
    let paused = dashboard.pause_test_run().await.unwrap();
    let notice = client.recv().await;
    sleep(Duration::from_secs(5)).await;
    let during_pause = dashboard.timer_status().await;
    let resumed = dashboard.resume_test_run().await.unwrap();
    let resume_notice = client.recv().await;
    sleep(Duration::from_secs(10)).await;
    let after = dashboard.timer_status().await;

    // Assert
    assert_eq!(paused.remaining_seconds, 50);
    assert!(paused.paused);
    assert_eq!(notice.kind(), MessageType::TestPaused);
    assert_eq!(during_pause.remaining_seconds, 50);
    assert_eq!(resumed.remaining_seconds, 50);
    assert!(resumed.running);
    assert_eq!(resume_notice.kind(), MessageType::TestResumed);
    assert_eq!(after.remaining_seconds, 40);
    assert!(after.running);
    assert!(dashboard.has_scheduled_timer().await);
    assert_eq!(dashboard.client_summaries().await[0].status, SessionStatus::Running);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_sessions_show_paused_status_while_paused() {
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 1).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;
    dashboard.start_test_run().await.unwrap();
    client.recv().await;

    dashboard.pause_test_run().await.unwrap();

    assert!(dashboard.is_test_paused().await);
    assert!(!dashboard.has_scheduled_timer().await);
    assert_eq!(dashboard.client_summaries().await[0].status, SessionStatus::Paused);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_pausing_twice_sends_one_notice() {
    // Arrange
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 1).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;
    dashboard.start_test_run().await.unwrap();
    client.recv().await;

    // Act
    dashboard.pause_test_run().await.unwrap();
    dashboard.pause_test_run().await.unwrap();
    client.send(MessageType::AskOverview, &ada, &[]).await;

    // Assert
    assert_eq!(client.recv().await.kind(), MessageType::TestPaused);
    assert_eq!(client.recv().await.kind(), MessageType::SendOverview);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_expiry_while_paused() {
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 1).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;
    dashboard.start_test_run().await.unwrap();
    client.recv().await;

    dashboard.pause_test_run().await.unwrap();
    client.recv().await;
    sleep(Duration::from_secs(300)).await;

    assert_eq!(dashboard.client_summaries().await.len(), 1);
    assert_eq!(dashboard.timer_status().await.remaining_seconds, 60);
    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_extra_time_extends_running_countdown() {
    let dashboard = make_dashboard();
    host(&dashboard, 1).await;
    dashboard.start_test_run().await.unwrap();
    sleep(Duration::from_secs(20)).await;

    let status = dashboard.add_extra_time_minutes(2).await.unwrap();

    assert_eq!(status.total_seconds, 180);
    assert_eq!(status.remaining_seconds, 160);
    assert!(status.running);
}

#[tokio::test(start_paused = true)]
async fn test_extra_time_after_expiry_reopens_the_run() {
    // Arrange
    let dashboard = make_dashboard();
    let (_, alan) = host(&dashboard, 1).await;
    dashboard.start_test_run().await.unwrap();
    sleep(Duration::from_secs(61)).await;
    assert!(!dashboard.has_scheduled_timer().await);

    // Act
    let status = dashboard.add_extra_time_minutes(1).await.unwrap();

    // Assert
    assert_eq!(status.remaining_seconds, 60);
    assert!(status.running);
    assert!(dashboard.has_scheduled_timer().await);
    let mut late = TestClient::connect(&dashboard);
    assert_eq!(late.auth(&alan).await.kind(), MessageType::AuthOk);
    late.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_untimed_run_never_expires() {
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 0).await;
    let mut client = TestClient::connect(&dashboard);
    client.auth(&ada).await;
    dashboard.start_test_run().await.unwrap();
    client.recv().await;

    sleep(Duration::from_secs(3600)).await;

    assert_eq!(dashboard.client_summaries().await.len(), 1);
    assert!(!dashboard.has_scheduled_timer().await);
    client.disconnect().await;
}
