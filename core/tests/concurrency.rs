//! Concurrency tests: per-incident serialization, independent progress
//! across incidents, and the ack-versus-expiry race where resolution
//! always wins.

use chrono::Duration;
use oncall_core::clock::ManualClock;
use oncall_core::engine::Engine;
use oncall_core::error::EngineError;
use oncall_core::incident::{Status, Tier};
use oncall_core::policy::PolicyTable;
use oncall_core::store::EngineStore;
use std::sync::Arc;
use std::thread;

fn build() -> (Arc<Engine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let store = EngineStore::in_memory().expect("in-memory store");
    let engine = Arc::new(
        Engine::with_defaults(store, clock.clone(), PolicyTable::default())
            .expect("build engine"),
    );
    (engine, clock)
}

#[test]
fn incidents_progress_independently_across_threads() {
    let (engine, clock) = build();

    let ids: Vec<String> = (0..8)
        .map(|i| {
            engine
                .create("SEV2", &format!("incident {i}"), "monitoring")
                .unwrap()
                .incident_id
        })
        .collect();
    clock.advance(Duration::minutes(5));

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let engine = engine.clone();
            thread::spawn(move || {
                engine.transition(&id, Status::Acknowledged, "desk").unwrap();
                engine.transition(&id, Status::InProgress, "desk").unwrap();
                engine.transition(&id, Status::Resolved, "desk").unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for id in &ids {
        let inc = engine.incident(id).unwrap();
        assert_eq!(inc.status, Status::Resolved);
        assert!(engine.escalations(id).unwrap().is_empty());
    }
}

#[test]
fn ack_and_expiry_race_serializes_and_resolution_wins() {
    // Run the race repeatedly; whichever side loses the per-incident
    // lock must observe the other's write. An incident resolved before
    // its expiry is processed produces no escalation.
    for _ in 0..20 {
        let (engine, clock) = build();
        let inc = engine.create("SEV1", "racy outage", "monitoring").unwrap();
        let id = inc.incident_id.clone();
        clock.advance(Duration::minutes(16));

        let resolver = {
            let engine = engine.clone();
            let id = id.clone();
            thread::spawn(move || {
                engine.transition(&id, Status::Acknowledged, "desk").unwrap();
                engine.transition(&id, Status::InProgress, "desk").unwrap();
                engine.transition(&id, Status::Resolved, "desk").unwrap();
            })
        };
        let poller = {
            let engine = engine.clone();
            thread::spawn(move || {
                engine.poll_due().unwrap();
            })
        };
        resolver.join().unwrap();
        poller.join().unwrap();

        let after = engine.incident(&id).unwrap();
        assert_eq!(after.status, Status::Resolved);
        let escalations = engine.escalations(&id).unwrap();
        // Either the expiry was processed first (one escalation) or the
        // resolution cancelled/discarded it (none). Never more.
        assert!(escalations.len() <= 1, "duplicate escalation under race");
        if let Some(first) = escalations.first() {
            assert_eq!(first.to_tier, Tier::Tier2);
        }

        // Once resolved, repolling can never escalate further.
        engine.poll_due().unwrap();
        assert_eq!(engine.escalations(&id).unwrap().len(), escalations.len());
    }
}

#[test]
fn concurrent_polls_deliver_each_expiry_once() {
    let (engine, clock) = build();
    let inc = engine.create("SEV1", "site down", "monitoring").unwrap();
    clock.advance(Duration::minutes(16));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.poll_due().unwrap().len())
        })
        .collect();
    let delivered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert!(delivered >= 1);
    assert_eq!(
        engine.escalations(&inc.incident_id).unwrap().len(),
        1,
        "exactly one escalation regardless of poller count"
    );
}

#[test]
fn version_tracking_callers_see_concurrent_modification() {
    let (engine, _clock) = build();
    let inc = engine.create("SEV3", "slow exports", "desk").unwrap();
    let id = inc.incident_id.clone();

    let engine2 = engine.clone();
    let id2 = id.clone();
    let winner = thread::spawn(move || {
        engine2
            .transition(&id2, Status::Acknowledged, "desk-a")
            .unwrap()
    });
    winner.join().unwrap();

    let err = engine
        .transition_at_version(&id, Status::Acknowledged, "desk-b", inc.version)
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification { .. }));
}
