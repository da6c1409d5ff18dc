//! oncall-runner: headless driver for the incident engine.
//!
//! Replays a deterministic breach-and-escalate scenario against a
//! manual clock and dumps the resulting records and window metrics as
//! JSON. Doubles as an operator smoke tool against a real database.
//!
//! Usage:
//!   oncall-runner --db incidents.db
//!   oncall-runner              # in-memory

use anyhow::Result;
use chrono::Duration;
use oncall_core::clock::{Clock, ManualClock};
use oncall_core::engine::Engine;
use oncall_core::incident::{Status, Tier};
use oncall_core::policy::PolicyTable;
use oncall_core::store::EngineStore;
use std::env;
use std::sync::Arc;

#[derive(serde::Serialize)]
struct RunReport {
    incidents: Vec<oncall_core::incident::Incident>,
    escalations: Vec<oncall_core::incident::EscalationRecord>,
    metrics: oncall_core::metrics::WindowMetrics,
    health: oncall_core::engine::Health,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| ":memory:".to_string());

    let store = if db == ":memory:" {
        EngineStore::in_memory()?
    } else {
        EngineStore::open(&db)?
    };

    let clock = Arc::new(ManualClock::at_epoch());
    let engine = Engine::with_defaults(store, clock.clone(), PolicyTable::default())?;
    let start = clock.now();

    // SEV1 goes unacknowledged past its response target and escalates;
    // it resolves late, so compliance for it is false.
    let sev1 = engine.create("SEV1", "payment API down", "monitoring")?;
    // SEV3 is handled inside every target.
    let sev3 = engine.create("SEV3", "report export slow", "service-desk")?;

    clock.advance(Duration::minutes(15));
    engine.poll_due()?;

    clock.advance(Duration::minutes(5)); // t = 20m
    engine.transition(&sev1.incident_id, Status::Acknowledged, "tier2-oncall")?;
    engine.transition(&sev1.incident_id, Status::InProgress, "tier2-oncall")?;

    engine.transition(&sev3.incident_id, Status::Acknowledged, "service-desk")?;
    engine.transition(&sev3.incident_id, Status::InProgress, "service-desk")?;
    engine.transition(&sev3.incident_id, Status::Resolved, "service-desk")?;

    clock.advance(Duration::hours(4) + Duration::minutes(40)); // t = 5h
    engine.poll_due()?;
    engine.transition(&sev1.incident_id, Status::Resolved, "tier2-oncall")?;
    engine.transition(&sev1.incident_id, Status::Closed, "incident-manager")?;

    // Manual override example: pull the SEV3 back to engineering for a
    // regression check, then close it out.
    let reopened = engine.transition(&sev3.incident_id, Status::InProgress, "qa")?;
    engine.reassign_tier(&reopened.incident_id, Tier::Tier3, "regression suspected", "director")?;
    engine.transition(&sev3.incident_id, Status::Resolved, "engineering")?;
    engine.transition(&sev3.incident_id, Status::Closed, "service-desk")?;

    let end = clock.now() + Duration::minutes(1);
    let report = RunReport {
        incidents: vec![
            engine.incident(&sev1.incident_id)?,
            engine.incident(&sev3.incident_id)?,
        ],
        escalations: engine
            .escalations(&sev1.incident_id)?
            .into_iter()
            .chain(engine.escalations(&sev3.incident_id)?)
            .collect(),
        metrics: engine.metrics_window(start, end)?,
        health: engine.health(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    log::info!("scenario complete: {} escalations", report.escalations.len());
    Ok(())
}
