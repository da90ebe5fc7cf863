//! Tracker lifecycle tests

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use deploytrack::channels::{ChannelOptions, PollSource, PushSource};
use deploytrack::errors::TrackerError;
use deploytrack::models::deployment::StreamEvent;
use deploytrack::track::classify::Severity;
use deploytrack::track::events::{Origin, RemoteStatus};
use deploytrack::{LifecycleState, TeardownReason, Tracker, TrackerSettings};

use tokio_test::assert_ok;

use crate::support::{job_status, settle, FakePoll, FakePush};

fn settings(grace: u64, watchdog: u64, poll_interval: u64) -> TrackerSettings {
    TrackerSettings {
        channels: ChannelOptions {
            grace: Duration::from_secs(grace),
            poll_interval: Duration::from_secs(poll_interval),
        },
        watchdog: Duration::from_secs(watchdog),
    }
}

fn push_only(push: &Arc<FakePush>, settings: TrackerSettings) -> Tracker {
    let push: Arc<dyn PushSource> = push.clone();
    Tracker::new(settings, Some(push), None).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_push_success_scenario() {
    let (push, frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let mut session = assert_ok!(tracker.start("proj1"));
    assert_eq!(tracker.state(), LifecycleState::Tracking);

    frames
        .send(Ok(StreamEvent::Connected {
            message: Some("Stream connected".to_string()),
        }))
        .unwrap();
    frames
        .send(Ok(StreamEvent::Status {
            status: RemoteStatus::Building,
            domain: None,
        }))
        .unwrap();
    frames
        .send(Ok(StreamEvent::Complete {
            status: RemoteStatus::Live,
            domain: Some("proj1.example.com".to_string()),
            url: None,
        }))
        .unwrap();

    let view = session.wait_terminal().await;
    assert_eq!(view.state, LifecycleState::Succeeded);
    assert_eq!(view.snapshot.state, LifecycleState::Succeeded);
    assert_eq!(view.snapshot.domain.as_deref(), Some("proj1.example.com"));
    assert_eq!(view.teardown, Some(TeardownReason::Terminal));

    let terminal_lines: Vec<_> = view
        .log
        .iter()
        .filter(|r| r.message.contains("completed successfully"))
        .collect();
    assert_eq!(terminal_lines.len(), 1);
    assert_eq!(terminal_lines[0].severity, Severity::Success);
    assert_eq!(view.log.last().unwrap().sequence, terminal_lines[0].sequence);

    // One "connected" record even though both the open and the frame announced it
    let connected = view
        .log
        .iter()
        .filter(|r| r.message.contains("Connected"))
        .count();
    assert_eq!(connected, 1);

    settle().await;
    assert_eq!(push.dropped.load(Ordering::SeqCst), 1);
    assert!(!tracker.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_fails_silent_session() {
    let (push, _frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let started = tokio::time::Instant::now();
    let mut session = assert_ok!(tracker.start("proj2"));
    let view = session.wait_terminal().await;

    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(view.state, LifecycleState::Failed);
    assert_eq!(view.teardown, Some(TeardownReason::Terminal));

    let timeout_line = view
        .log
        .iter()
        .find(|r| r.origin == Origin::Watchdog && r.severity == Severity::Error)
        .expect("watchdog record");
    assert!(timeout_line.message.contains("longer than expected"));

    settle().await;
    assert_eq!(push.opened.load(Ordering::SeqCst), 1);
    assert_eq!(push.dropped.load(Ordering::SeqCst), 1);

    // A second cancel does not tear down again
    tracker.cancel();
    assert_eq!(tracker.view().teardown, Some(TeardownReason::Terminal));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_tracking_state() {
    let (push, frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let session = assert_ok!(tracker.start("proj3"));
    frames
        .send(Ok(StreamEvent::Log {
            message: "Cloning repository...".to_string(),
        }))
        .unwrap();
    settle().await;
    assert_eq!(session.log().len(), 2);

    tracker.cancel();
    settle().await;

    let view = tracker.view();
    assert_eq!(view.state, LifecycleState::Tracking);
    assert_eq!(view.teardown, Some(TeardownReason::Cancelled));
    assert!(!tracker.is_active());
    assert_eq!(push.dropped.load(Ordering::SeqCst), 1);

    // Idempotent
    tracker.cancel();
    assert_eq!(tracker.view().teardown, Some(TeardownReason::Cancelled));

    // Nothing arrives after cancellation
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(tracker.view().state, LifecycleState::Tracking);

    let next = assert_ok!(tracker.start("proj3"));
    assert_eq!(next.view().state, LifecycleState::Tracking);
    assert!(next.view().log.is_empty());
    assert_ne!(next.session_id(), session.session_id());
    tracker.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_start_while_tracking_is_rejected() {
    let (push, _frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let session = assert_ok!(tracker.start("proj"));
    let result = tracker.start("other");
    assert!(matches!(result, Err(TrackerError::AlreadyTrackingError(job)) if job == "proj"));
    assert_eq!(tracker.view().job_id.as_deref(), Some("proj"));
    assert_eq!(tracker.view().session_id, Some(session.session_id()));

    tracker.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_completion_within_grace_wins() {
    let (push, frames) = FakePush::new();
    let poll = FakePoll::new(vec![
        Ok(job_status("Building", None, None)),
        Ok(job_status("Live", Some("app.example.com"), None)),
    ]);
    let push_source: Arc<dyn PushSource> = push.clone();
    let poll_source: Arc<dyn PollSource> = poll.clone();
    let tracker = Tracker::new(settings(3, 15, 1), Some(push_source), Some(poll_source)).unwrap();

    let started = tokio::time::Instant::now();
    let mut session = assert_ok!(tracker.start("app"));
    frames
        .send(Err(TrackerError::TransportError("connection reset".to_string())))
        .unwrap();

    let view = session.wait_terminal().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(view.state, LifecycleState::Succeeded);
    assert_eq!(view.snapshot.result_url.as_deref(), Some("http://app.example.com"));
    assert!(!view
        .log
        .iter()
        .any(|r| r.message.contains("Connection interrupted")));

    // The pending grace timer never reports
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(tracker.view().state, LifecycleState::Succeeded);
    assert_eq!(tracker.view().log.len(), view.log.len());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_transport_error_fails_after_grace() {
    let push = FakePush::failing("connection refused");
    let tracker = push_only(&push, settings(3, 15, 1));

    let started = tokio::time::Instant::now();
    let mut session = assert_ok!(tracker.start("app"));
    let view = session.wait_terminal().await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(15));
    assert_eq!(view.state, LifecycleState::Failed);

    let interrupted = view
        .log
        .iter()
        .find(|r| r.message.contains("Connection interrupted"))
        .expect("transport record");
    assert_eq!(interrupted.severity, Severity::Error);
    assert!(interrupted.message.contains("connection refused"));
    assert_eq!(view.log.last().unwrap().severity, Severity::Info);
}

#[tokio::test(start_paused = true)]
async fn test_push_reconnects_within_grace() {
    let (push, streams) = FakePush::reconnecting(2);
    streams[0]
        .send(Err(TrackerError::TransportError("connection reset".to_string())))
        .unwrap();
    streams[1]
        .send(Ok(StreamEvent::Complete {
            status: RemoteStatus::Live,
            domain: Some("app.example.com".to_string()),
            url: None,
        }))
        .unwrap();
    let tracker = push_only(&push, settings(3, 15, 1));

    let started = tokio::time::Instant::now();
    let mut session = assert_ok!(tracker.start("app"));
    let view = session.wait_terminal().await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(view.state, LifecycleState::Succeeded);
    assert_eq!(view.snapshot.result_url.as_deref(), Some("http://app.example.com"));
    assert_eq!(push.opened.load(Ordering::SeqCst), 2);
    assert!(!view
        .log
        .iter()
        .any(|r| r.message.contains("Connection interrupted")));
    assert_eq!(
        view.log
            .iter()
            .filter(|r| r.message.contains("Connected to build stream"))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_push_grace_restarts_after_reconnected_stream_delivers() {
    let (push, mut streams) = FakePush::reconnecting(2);
    streams[0]
        .send(Err(TrackerError::TransportError("connection reset".to_string())))
        .unwrap();
    let second = streams.remove(1);
    second
        .send(Ok(StreamEvent::Log {
            message: "Installing dependencies".to_string(),
        }))
        .unwrap();
    drop(second);
    let tracker = push_only(&push, settings(3, 15, 1));

    let started = tokio::time::Instant::now();
    let mut session = assert_ok!(tracker.start("app"));
    let view = session.wait_terminal().await;

    // First reconnect after the initial backoff, then a full window after the second drop
    assert!(started.elapsed() >= Duration::from_millis(3250));
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(view.state, LifecycleState::Failed);
    assert!(view
        .log
        .iter()
        .any(|r| r.message == "Installing dependencies"));
    assert!(view
        .log
        .iter()
        .any(|r| r.message.contains("Connection interrupted")));
    assert!(push.opened.load(Ordering::SeqCst) > 2);
}

#[tokio::test(start_paused = true)]
async fn test_poll_does_not_repeat_log_lines() {
    let poll = FakePoll::new(vec![
        Ok(job_status("Building", None, Some("Cloning...\nInstalling..."))),
        Ok(job_status("Building", None, Some("Cloning...\nInstalling..."))),
        Ok(job_status("Building", None, Some("Cloning...\nInstalling...\nBuild completed"))),
        Ok(job_status("Live", Some("app.example.com"), Some("Cloning...\nInstalling...\nBuild completed"))),
    ]);
    let poll_source: Arc<dyn PollSource> = poll.clone();
    let tracker = Tracker::new(settings(3, 60, 1), None, Some(poll_source)).unwrap();

    let mut session = assert_ok!(tracker.start("app"));
    let view = session.wait_terminal().await;
    assert_eq!(view.state, LifecycleState::Succeeded);

    let lines: Vec<&str> = view
        .log
        .iter()
        .filter(|r| r.origin == Origin::Poll)
        .map(|r| r.message.as_str())
        .filter(|m| !m.starts_with('⚙') && !m.starts_with('✅'))
        .collect();
    assert_eq!(lines, vec!["Cloning...", "Installing...", "Build completed"]);

    let completed = view
        .log
        .iter()
        .find(|r| r.message == "Build completed")
        .unwrap();
    assert_eq!(completed.severity, Severity::Success);
    assert_eq!(poll.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_poll_errors_are_soft() {
    let poll = FakePoll::new(vec![
        Err(TrackerError::TransportError("502 Bad Gateway".to_string())),
        Err(TrackerError::NotFound("project app".to_string())),
        Ok(job_status("Failed", None, Some("npm ERR! Error: missing script: build"))),
    ]);
    let poll_source: Arc<dyn PollSource> = poll.clone();
    let tracker = Tracker::new(settings(3, 60, 1), None, Some(poll_source)).unwrap();

    let mut session = assert_ok!(tracker.start("app"));
    let view = session.wait_terminal().await;

    assert_eq!(view.state, LifecycleState::Failed);
    assert_eq!(view.snapshot.remote_status, Some(RemoteStatus::Failed));
    assert!(view
        .log
        .iter()
        .any(|r| r.message.contains("npm ERR!") && r.severity == Severity::Error));
}

#[tokio::test(start_paused = true)]
async fn test_remote_error_fails_immediately() {
    let (push, frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let mut session = assert_ok!(tracker.start("missing"));
    frames
        .send(Ok(StreamEvent::Error {
            message: "Project not found".to_string(),
        }))
        .unwrap();

    let view = session.wait_terminal().await;
    assert_eq!(view.state, LifecycleState::Failed);
    let last = view.log.last().unwrap();
    assert_eq!(last.message, "❌ Project not found");
    assert_eq!(last.severity, Severity::Error);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frames_are_skipped() {
    let (push, frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let mut session = assert_ok!(tracker.start("app"));
    frames
        .send(Err(TrackerError::DecodeError("unknown variant `heartbeat`".to_string())))
        .unwrap();
    frames
        .send(Ok(StreamEvent::Log {
            message: "Step 1/3".to_string(),
        }))
        .unwrap();
    frames
        .send(Ok(StreamEvent::Log {
            message: "Step 1/3".to_string(),
        }))
        .unwrap();
    frames
        .send(Ok(StreamEvent::Complete {
            status: RemoteStatus::Live,
            domain: None,
            url: Some("https://app.example.com".to_string()),
        }))
        .unwrap();

    let view = session.wait_terminal().await;
    assert_eq!(view.state, LifecycleState::Succeeded);
    assert_eq!(
        view.log.iter().filter(|r| r.message == "Step 1/3").count(),
        1
    );
    assert_eq!(view.snapshot.result_url.as_deref(), Some("https://app.example.com"));

    let sequences: Vec<u64> = view.log.iter().map(|r| r.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_server_timeout_event() {
    let (push, frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let mut session = assert_ok!(tracker.start("slow"));
    frames
        .send(Ok(StreamEvent::Timeout {
            message: Some("Deployment timeout".to_string()),
        }))
        .unwrap();

    let view = session.wait_terminal().await;
    assert_eq!(view.state, LifecycleState::Failed);
    assert!(view
        .log
        .iter()
        .any(|r| r.origin == Origin::Push && r.message.contains("timed out")));
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_are_notified() {
    let (push, frames) = FakePush::new();
    let tracker = push_only(&push, settings(3, 15, 1));

    let mut rx = tracker.subscribe();
    let _session = assert_ok!(tracker.start("app"));
    let _ = rx.borrow_and_update();

    frames
        .send(Ok(StreamEvent::Log {
            message: "Building image".to_string(),
        }))
        .unwrap();
    rx.wait_for(|view| view.log.iter().any(|r| r.message == "Building image"))
        .await
        .unwrap();

    tracker.cancel();
}

#[test]
fn test_tracker_rejects_invalid_settings() {
    let (push, _frames) = FakePush::new();
    let push: Arc<dyn PushSource> = push;

    let result = Tracker::new(settings(15, 15, 1), Some(push.clone()), None);
    assert!(matches!(result, Err(TrackerError::ConfigError(_))));

    let result = Tracker::new(settings(3, 15, 0), Some(push), None);
    assert!(matches!(result, Err(TrackerError::ConfigError(_))));

    let result = Tracker::new(settings(3, 15, 1), None, None);
    assert!(matches!(result, Err(TrackerError::ConfigError(_))));
}
