//! FSM unit tests

use std::time::Duration;

use deploytrack::track::classify::{classify, Severity};
use deploytrack::track::events::{Envelope, Origin, RemoteStatus, TrackerEvent};
use deploytrack::track::fsm::{DeploymentFsm, LifecycleState, Transition};

fn started() -> DeploymentFsm {
    let mut fsm = DeploymentFsm::new("proj1", Duration::from_secs(15));
    fsm.start().unwrap();
    fsm
}

fn live(origin: Origin) -> Envelope {
    Envelope::new(
        origin,
        TrackerEvent::Complete {
            status: RemoteStatus::Live,
            domain: Some("proj1.example.com".to_string()),
            url: None,
        },
    )
}

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new("proj1", Duration::from_secs(15));
    assert_eq!(fsm.state(), LifecycleState::Idle);
    assert_eq!(fsm.snapshot().state, LifecycleState::Idle);
    assert!(fsm.log().is_empty());
    assert_eq!(fsm.job_id(), "proj1");
}

#[test]
fn test_fsm_tracking_entered_once() {
    let mut fsm = started();
    assert!(fsm.start().is_err());

    fsm.process(live(Origin::Push));
    assert!(fsm.start().is_err());
    assert_eq!(fsm.state(), LifecycleState::Succeeded);
}

#[test]
fn test_fsm_push_success_flow() {
    let mut fsm = started();

    fsm.process(Envelope::new(Origin::Push, TrackerEvent::Connected));
    fsm.process(Envelope::new(
        Origin::Push,
        TrackerEvent::StatusUpdate {
            status: RemoteStatus::Building,
            domain: None,
        },
    ));
    assert_eq!(fsm.state(), LifecycleState::Tracking);

    let before = fsm.log().len();
    let outcome = fsm.process(live(Origin::Push));
    assert_eq!(outcome, Transition::Terminal(LifecycleState::Succeeded));

    let appended: Vec<_> = fsm.log().iter().skip(before).collect();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].severity, Severity::Success);

    let snapshot = fsm.snapshot();
    assert_eq!(snapshot.state, LifecycleState::Succeeded);
    assert_eq!(snapshot.domain.as_deref(), Some("proj1.example.com"));
}

#[test]
fn test_fsm_terminal_entered_once() {
    let mut fsm = started();

    let first = fsm.process(live(Origin::Poll));
    assert_eq!(first, Transition::Terminal(LifecycleState::Succeeded));
    let records = fsm.log().len();

    // Both channels report the same completion; the second is ignored
    assert_eq!(fsm.process(live(Origin::Push)), Transition::Ignored);
    assert_eq!(
        fsm.process(Envelope::new(Origin::Watchdog, TrackerEvent::TimedOut)),
        Transition::Ignored
    );
    assert_eq!(
        fsm.process(Envelope::new(
            Origin::Push,
            TrackerEvent::TransportError("eof".to_string())
        )),
        Transition::Ignored
    );
    assert_eq!(
        fsm.process(Envelope::new(Origin::Push, TrackerEvent::LogLine("late".to_string()))),
        Transition::Ignored
    );

    assert_eq!(fsm.state(), LifecycleState::Succeeded);
    assert_eq!(fsm.log().len(), records);
}

#[test]
fn test_fsm_snapshot_is_replaced() {
    let mut fsm = started();
    let before = fsm.snapshot();

    fsm.process(Envelope::new(
        Origin::Poll,
        TrackerEvent::StatusUpdate {
            status: RemoteStatus::Queued,
            domain: None,
        },
    ));

    // Readers holding the old snapshot keep a consistent value
    assert_eq!(before.remote_status, None);
    assert_eq!(fsm.snapshot().remote_status, Some(RemoteStatus::Queued));
}

#[test]
fn test_fsm_failed_complete() {
    let mut fsm = started();
    let outcome = fsm.process(Envelope::new(
        Origin::Push,
        TrackerEvent::Complete {
            status: RemoteStatus::Failed,
            domain: None,
            url: None,
        },
    ));
    assert_eq!(outcome, Transition::Terminal(LifecycleState::Failed));
    assert_eq!(fsm.snapshot().remote_status, Some(RemoteStatus::Failed));
}

#[test]
fn test_classify_tie_break() {
    for line in [
        "✅ done ❌",
        "ERROR handler SUCCESS",
        "build failed, retry completed",
        "completed with error",
    ] {
        assert_eq!(classify(line), Severity::Success, "line: {}", line);
    }
}
