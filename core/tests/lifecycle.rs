//! Lifecycle state machine tests: creation, the transition graph,
//! timestamp bookkeeping, reopening, and stale-version detection.

use chrono::Duration;
use oncall_core::clock::{Clock, ManualClock};
use oncall_core::engine::Engine;
use oncall_core::error::EngineError;
use oncall_core::incident::{PirStatus, Status, Tier};
use oncall_core::policy::PolicyTable;
use oncall_core::store::EngineStore;
use std::sync::Arc;

fn build() -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = EngineStore::in_memory().expect("in-memory store");
    let engine = Engine::with_defaults(store, clock.clone(), PolicyTable::default())
        .expect("build engine");
    (engine, clock)
}

#[test]
fn create_starts_clocks_at_tier_one() {
    let (engine, clock) = build();
    let inc = engine.create("SEV1", "checkout down", "monitoring").unwrap();

    assert_eq!(inc.status, Status::Open);
    assert_eq!(inc.owning_tier, Tier::Tier1);
    assert_eq!(inc.detected_at, clock.now());
    assert_eq!(
        inc.response_deadline,
        Some(clock.now() + Duration::minutes(15))
    );
    assert_eq!(
        inc.resolution_deadline,
        Some(clock.now() + Duration::hours(4))
    );
    assert_eq!(inc.original_resolution_deadline, clock.now() + Duration::hours(4));
    assert_eq!(inc.pir_status, PirStatus::None);
}

#[test]
fn create_rejects_unknown_severity() {
    let (engine, _clock) = build();
    let err = engine.create("SEV9", "??", "monitoring").unwrap_err();
    assert!(matches!(err, EngineError::InvalidSeverity { .. }));
}

#[test]
fn transition_unknown_incident_is_not_found() {
    let (engine, _clock) = build();
    let err = engine
        .transition("inc-missing", Status::Acknowledged, "nobody")
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[test]
fn happy_path_stamps_each_timestamp_once() {
    let (engine, clock) = build();
    let inc = engine.create("SEV2", "api errors", "monitoring").unwrap();
    let id = inc.incident_id.clone();

    clock.advance(Duration::minutes(5));
    let acked = engine.transition(&id, Status::Acknowledged, "desk").unwrap();
    assert_eq!(acked.acknowledged_at, Some(clock.now()));
    assert_eq!(acked.response_deadline, None, "response clock cancelled");

    clock.advance(Duration::minutes(10));
    engine.transition(&id, Status::InProgress, "desk").unwrap();

    clock.advance(Duration::hours(1));
    let resolved = engine.transition(&id, Status::Resolved, "desk").unwrap();
    assert_eq!(resolved.resolved_at, Some(clock.now()));
    assert_eq!(resolved.resolution_deadline, None);

    clock.advance(Duration::minutes(30));
    let closed = engine.transition(&id, Status::Closed, "manager").unwrap();
    assert_eq!(closed.closed_at, Some(clock.now()));
    assert_eq!(closed.status, Status::Closed);
    // Monotonically non-decreasing lifecycle timestamps.
    assert!(closed.detected_at <= closed.acknowledged_at.unwrap());
    assert!(closed.acknowledged_at.unwrap() <= closed.resolved_at.unwrap());
    assert!(closed.resolved_at.unwrap() <= closed.closed_at.unwrap());
}

#[test]
fn skipping_states_is_rejected() {
    let (engine, _clock) = build();
    let inc = engine.create("SEV3", "minor", "desk").unwrap();

    let err = engine
        .transition(&inc.incident_id, Status::Resolved, "desk")
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalTransition { .. }));

    let err = engine
        .transition(&inc.incident_id, Status::Closed, "desk")
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalTransition { .. }));
}

#[test]
fn reopen_inside_window_returns_to_in_progress() {
    let (engine, clock) = build();
    let inc = engine.create("SEV2", "flaky search", "monitoring").unwrap();
    let id = inc.incident_id.clone();
    engine.transition(&id, Status::Acknowledged, "desk").unwrap();
    engine.transition(&id, Status::InProgress, "desk").unwrap();
    engine.transition(&id, Status::Resolved, "desk").unwrap();

    clock.advance(Duration::hours(24));
    let reopened = engine.transition(&id, Status::InProgress, "qa").unwrap();
    assert_eq!(reopened.status, Status::InProgress);
    assert_eq!(reopened.resolved_at, None);
    assert_eq!(reopened.closed_at, None);
    assert!(
        reopened.resolution_deadline.is_some(),
        "resolution clock re-armed on reopen"
    );
}

#[test]
fn reopen_after_window_fails_stale() {
    let (engine, clock) = build();
    let inc = engine.create("SEV2", "flaky search", "monitoring").unwrap();
    let id = inc.incident_id.clone();
    engine.transition(&id, Status::Acknowledged, "desk").unwrap();
    engine.transition(&id, Status::InProgress, "desk").unwrap();
    engine.transition(&id, Status::Resolved, "desk").unwrap();
    engine.transition(&id, Status::Closed, "desk").unwrap();

    clock.advance(Duration::hours(73));
    let err = engine.transition(&id, Status::InProgress, "qa").unwrap_err();
    assert!(matches!(err, EngineError::StaleReopen { .. }));
    assert_eq!(engine.incident(&id).unwrap().status, Status::Closed);
}

#[test]
fn stale_version_is_surfaced_to_tracking_callers() {
    let (engine, _clock) = build();
    let inc = engine.create("SEV2", "api errors", "monitoring").unwrap();
    let id = inc.incident_id.clone();
    let tracked_version = inc.version;

    // Someone else moves the incident forward.
    engine.transition(&id, Status::Acknowledged, "desk").unwrap();

    let err = engine
        .transition_at_version(&id, Status::Acknowledged, "late-caller", tracked_version)
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification { .. }));
}

#[test]
fn retriage_changes_severity_and_recomputes_deadlines() {
    let (engine, clock) = build();
    let inc = engine.create("SEV3", "slow queries", "monitoring").unwrap();
    let id = inc.incident_id.clone();

    let retriaged = engine.retriage(&id, "SEV1", "incident-commander").unwrap();
    assert_eq!(retriaged.severity.as_str(), "SEV1");
    assert_eq!(
        retriaged.resolution_deadline,
        Some(inc.detected_at + Duration::hours(4))
    );
    assert_eq!(
        retriaged.response_deadline,
        Some(inc.detected_at + Duration::minutes(15))
    );

    // The re-triage is recorded as an event.
    let events = engine.events(&id).unwrap();
    assert!(events.iter().any(|e| e.event_type == "incident_retriaged"));

    // Terminal incidents cannot be re-triaged.
    engine.transition(&id, Status::Acknowledged, "desk").unwrap();
    engine.transition(&id, Status::InProgress, "desk").unwrap();
    clock.advance(Duration::minutes(30));
    engine.transition(&id, Status::Resolved, "desk").unwrap();
    let err = engine.retriage(&id, "SEV2", "anyone").unwrap_err();
    assert!(matches!(err, EngineError::IllegalTransition { .. }));
}

#[test]
fn every_mutation_lands_in_the_event_log() {
    let (engine, clock) = build();
    let inc = engine.create("SEV2", "api errors", "monitoring").unwrap();
    let id = inc.incident_id.clone();
    engine.transition(&id, Status::Acknowledged, "desk").unwrap();
    engine.transition(&id, Status::InProgress, "desk").unwrap();
    clock.advance(Duration::minutes(10));
    engine.transition(&id, Status::Resolved, "desk").unwrap();

    let events = engine.events(&id).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "incident_created",
            "status_changed",
            "status_changed",
            "status_changed"
        ]
    );
}
