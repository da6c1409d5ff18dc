//! The incident engine — composition root and public API.
//!
//! RULES:
//!   - Every mutation of a given incident happens under that incident's
//!     lock; operations on different incidents proceed independently.
//!   - Status and tier writes go through the lifecycle rules here and
//!     nowhere else. The timer engine only surfaces expiry events.
//!   - Timer cancellation is synchronous: by the time a transition
//!     returns, no expiry for a deadline it cancelled can be delivered.

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::escalation::{self, Decision};
use crate::event::{EngineEvent, EventLogEntry};
use crate::incident::{
    EscalationRecord, EscalationTrigger, Incident, PirStatus, Severity, Status, Tier,
};
use crate::lifecycle;
use crate::metrics::{self, WindowMetrics};
use crate::notify::{BreachNotice, LogNotifier, LogReviewTracker, Notifier, ReviewTracker};
use crate::pir;
use crate::policy::PolicyTable;
use crate::store::EngineStore;
use crate::timer::{DeadlineKind, Expiry, TimerEngine};
use crate::types::IncidentId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Health signal for the operational-monitoring collaborator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded { reason: String },
}

#[derive(Default)]
struct IncidentLocks {
    inner: Mutex<HashMap<IncidentId, Arc<Mutex<()>>>>,
}

impl IncidentLocks {
    /// Handle for this incident's exclusive section. Entries are never
    /// removed; incidents are retained indefinitely anyway.
    fn handle(&self, incident_id: &str) -> Arc<Mutex<()>> {
        let mut map = lock(&self.inner);
        map.entry(incident_id.to_string()).or_default().clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Engine {
    store: EngineStore,
    clock: Arc<dyn Clock>,
    policy: PolicyTable,
    timers: Mutex<TimerEngine>,
    locks: IncidentLocks,
    notifier: Arc<dyn Notifier>,
    reviews: Arc<dyn ReviewTracker>,
}

impl Engine {
    pub fn new(
        store: EngineStore,
        clock: Arc<dyn Clock>,
        policy: PolicyTable,
        notifier: Arc<dyn Notifier>,
        reviews: Arc<dyn ReviewTracker>,
    ) -> EngineResult<Self> {
        store.migrate()?;
        let engine = Self {
            store,
            clock,
            policy,
            timers: Mutex::new(TimerEngine::new()),
            locks: IncidentLocks::default(),
            notifier,
            reviews,
        };
        engine.rearm_active()?;
        Ok(engine)
    }

    /// Engine with log-only collaborators. Used by the runner and tests
    /// that do not inspect notifications.
    pub fn with_defaults(
        store: EngineStore,
        clock: Arc<dyn Clock>,
        policy: PolicyTable,
    ) -> EngineResult<Self> {
        Self::new(
            store,
            clock,
            policy,
            Arc::new(LogNotifier),
            Arc::new(LogReviewTracker),
        )
    }

    /// Re-arm timers for unresolved incidents, e.g. after a restart.
    fn rearm_active(&self) -> EngineResult<()> {
        let active = self.store.list_active_incidents()?;
        let mut timers = lock(&self.timers);
        for inc in &active {
            if let (Some(due), None) = (inc.response_deadline, inc.acknowledged_at) {
                timers.arm(&inc.incident_id, DeadlineKind::Response, due);
            }
            if let Some(due) = inc.resolution_deadline {
                timers.arm(&inc.incident_id, DeadlineKind::Resolution, due);
            }
        }
        if !active.is_empty() {
            log::info!("re-armed deadlines for {} active incidents", active.len());
        }
        Ok(())
    }

    // ── Intake ─────────────────────────────────────────────────

    /// Create an incident: status OPEN, TIER_1 ownership, response and
    /// resolution clocks started from the policy table.
    pub fn create(&self, severity: &str, description: &str, source: &str) -> EngineResult<Incident> {
        let severity = Severity::parse(severity)?;
        let now = self.clock.now();
        let policy = self.policy.for_severity(severity);

        let incident_id = format!("inc-{}", Uuid::new_v4());
        let response_deadline = now + policy.response_target();
        let resolution_deadline = now + policy.resolution_target();

        let incident = Incident {
            incident_id: incident_id.clone(),
            severity,
            status: Status::Open,
            description: description.to_string(),
            source: source.to_string(),
            detected_at: now,
            acknowledged_at: None,
            resolved_at: None,
            closed_at: None,
            owning_tier: Tier::Tier1,
            response_deadline: Some(response_deadline),
            resolution_deadline: Some(resolution_deadline),
            original_resolution_deadline: resolution_deadline,
            response_misses: 0,
            resolution_misses: 0,
            executive_flagged: false,
            pir_required: false,
            pir_status: PirStatus::None,
            pir_due: None,
            version: 0,
        };
        self.store.insert_incident(&incident)?;

        {
            let mut timers = lock(&self.timers);
            timers.arm(&incident_id, DeadlineKind::Response, response_deadline);
            timers.arm(&incident_id, DeadlineKind::Resolution, resolution_deadline);
        }

        self.record(EngineEvent::IncidentCreated {
            incident_id: incident_id.clone(),
            severity,
            tier: Tier::Tier1,
            detected_at: now,
        })?;
        log::info!(
            "incident created: {incident_id} severity={} response_due={response_deadline} resolution_due={resolution_deadline}",
            severity.as_str()
        );
        Ok(incident)
    }

    /// Explicit re-triage: the only way severity changes after intake.
    /// Deadlines are recomputed from detection under the new policy and
    /// miss counters reset.
    pub fn retriage(&self, incident_id: &str, severity: &str, actor: &str) -> EngineResult<Incident> {
        let severity = Severity::parse(severity)?;
        let handle = self.locks.handle(incident_id);
        let _guard = lock(&handle);

        let mut inc = self.fetch(incident_id)?;
        if inc.is_terminal() {
            return Err(EngineError::IllegalTransition {
                from: inc.status.as_str().to_string(),
                to: "re-triage".to_string(),
            });
        }
        let old_severity = inc.severity;
        if old_severity == severity {
            return Ok(inc);
        }

        let now = self.clock.now();
        let policy = self.policy.for_severity(severity);
        inc.severity = severity;
        inc.response_misses = 0;
        inc.resolution_misses = 0;
        inc.resolution_deadline = Some(inc.detected_at + policy.resolution_target());
        inc.original_resolution_deadline = inc.detected_at + policy.resolution_target();
        if inc.acknowledged_at.is_none() {
            inc.response_deadline = Some(inc.detected_at + policy.response_target());
        }

        {
            let mut timers = lock(&self.timers);
            if let (Some(due), None) = (inc.response_deadline, inc.acknowledged_at) {
                timers.arm(incident_id, DeadlineKind::Response, due);
            }
            if let Some(due) = inc.resolution_deadline {
                timers.arm(incident_id, DeadlineKind::Resolution, due);
            }
        }

        self.store.update_incident(&mut inc)?;
        self.record(EngineEvent::IncidentRetriaged {
            incident_id: incident_id.to_string(),
            old_severity,
            new_severity: severity,
            actor: actor.to_string(),
            at: now,
        })?;
        log::info!(
            "incident re-triaged: {incident_id} {} -> {} by {actor}",
            old_severity.as_str(),
            severity.as_str()
        );
        Ok(inc)
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Apply a status transition. Timers made irrelevant by the new
    /// status are cancelled before this returns.
    pub fn transition(
        &self,
        incident_id: &str,
        target: Status,
        actor: &str,
    ) -> EngineResult<Incident> {
        self.transition_inner(incident_id, target, actor, None)
    }

    /// As `transition`, but fails with `ConcurrentModification` when the
    /// record has moved past the version the caller tracked.
    pub fn transition_at_version(
        &self,
        incident_id: &str,
        target: Status,
        actor: &str,
        expected_version: u64,
    ) -> EngineResult<Incident> {
        self.transition_inner(incident_id, target, actor, Some(expected_version))
    }

    fn transition_inner(
        &self,
        incident_id: &str,
        target: Status,
        actor: &str,
        expected_version: Option<u64>,
    ) -> EngineResult<Incident> {
        let handle = self.locks.handle(incident_id);
        let _guard = lock(&handle);

        let mut inc = self.fetch(incident_id)?;
        if let Some(expected) = expected_version {
            if inc.version != expected {
                return Err(EngineError::ConcurrentModification {
                    incident_id: incident_id.to_string(),
                    expected,
                    actual: inc.version,
                });
            }
        }

        let from = inc.status;
        let now = self.clock.now();
        let reopening = lifecycle::is_reopen(from, target);
        lifecycle::apply_transition(&mut inc, target, now, self.policy.reopen_window())?;

        {
            let mut timers = lock(&self.timers);
            match target {
                Status::Acknowledged => {
                    // Response clock is satisfied; it never restarts.
                    timers.cancel(incident_id, DeadlineKind::Response);
                    inc.response_deadline = None;
                }
                Status::Resolved | Status::Closed => {
                    timers.cancel_all(incident_id);
                    inc.response_deadline = None;
                    inc.resolution_deadline = None;
                }
                Status::InProgress if reopening => {
                    // Same recompute rule as a tier change.
                    let interval = self.policy.for_severity(inc.severity).escalation_interval();
                    let due = now + interval;
                    inc.resolution_deadline = Some(due);
                    timers.arm(incident_id, DeadlineKind::Resolution, due);
                }
                _ => {}
            }
        }

        if target.is_terminal() {
            self.evaluate_pir(&mut inc)?;
        }

        self.store.update_incident(&mut inc)?;

        if reopening {
            self.record(EngineEvent::IncidentReopened {
                incident_id: incident_id.to_string(),
                from,
                actor: actor.to_string(),
                at: now,
            })?;
            log::info!("incident reopened: {incident_id} (was {})", from.as_str());
        } else {
            self.record(EngineEvent::StatusChanged {
                incident_id: incident_id.to_string(),
                from,
                to: target,
                actor: actor.to_string(),
                at: now,
            })?;
            log::info!(
                "incident {incident_id}: {} -> {} by {actor}",
                from.as_str(),
                target.as_str()
            );
        }
        Ok(inc)
    }

    /// PIR evaluation on entry to RESOLVED/CLOSED. Scheduling happens at
    /// most once; completion only ever comes from the external signal.
    fn evaluate_pir(&self, inc: &mut Incident) -> EngineResult<()> {
        if !pir::review_required(inc) {
            return Ok(());
        }
        inc.pir_required = true;
        if inc.pir_status != PirStatus::None {
            return Ok(());
        }
        let due = pir::review_due(inc);
        inc.pir_status = PirStatus::Scheduled;
        inc.pir_due = Some(due);
        if let Err(e) = self.reviews.schedule_review(&inc.incident_id, due) {
            // Fire-and-forget: the review stays SCHEDULED locally.
            log::warn!("review scheduling failed for {}: {e}", inc.incident_id);
        }
        self.record(EngineEvent::PirScheduled {
            incident_id: inc.incident_id.clone(),
            due,
        })?;
        Ok(())
    }

    /// External completion signal from the review tracker.
    pub fn complete_review(&self, incident_id: &str) -> EngineResult<Incident> {
        let handle = self.locks.handle(incident_id);
        let _guard = lock(&handle);

        let mut inc = self.fetch(incident_id)?;
        if inc.pir_status != PirStatus::Scheduled {
            return Err(EngineError::IllegalTransition {
                from: format!("pir:{}", inc.pir_status.as_str()),
                to: "pir:complete".to_string(),
            });
        }
        inc.pir_status = PirStatus::Complete;
        self.store.update_incident(&mut inc)?;
        self.record(EngineEvent::PirCompleted {
            incident_id: incident_id.to_string(),
            at: self.clock.now(),
        })?;
        Ok(inc)
    }

    /// Pull-side counterpart of `complete_review`: query the tracker
    /// and fold a COMPLETE answer into the record. A tracker failure is
    /// logged and leaves the review SCHEDULED.
    pub fn sync_review_status(&self, incident_id: &str) -> EngineResult<Incident> {
        let handle = self.locks.handle(incident_id);
        let _guard = lock(&handle);

        let mut inc = self.fetch(incident_id)?;
        if inc.pir_status != PirStatus::Scheduled {
            return Ok(inc);
        }
        match self.reviews.review_status(incident_id) {
            Ok(PirStatus::Complete) => {
                inc.pir_status = PirStatus::Complete;
                self.store.update_incident(&mut inc)?;
                self.record(EngineEvent::PirCompleted {
                    incident_id: incident_id.to_string(),
                    at: self.clock.now(),
                })?;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("review status query failed for {incident_id}: {e}");
            }
        }
        Ok(inc)
    }

    // ── Tier ownership ─────────────────────────────────────────

    /// Manual tier override (director/CISO path). Bypasses deadline
    /// checks, may move ownership in either direction, and is never
    /// reverted by a later timer tick.
    pub fn reassign_tier(
        &self,
        incident_id: &str,
        target_tier: Tier,
        reason: &str,
        actor: &str,
    ) -> EngineResult<Incident> {
        let handle = self.locks.handle(incident_id);
        let _guard = lock(&handle);
        let inc = self.fetch(incident_id)?;
        self.apply_reassignment(inc, target_tier, EscalationTrigger::Manual, reason, actor)
    }

    /// Shared reassignment path — the only place owning_tier changes.
    fn apply_reassignment(
        &self,
        mut inc: Incident,
        target_tier: Tier,
        trigger: EscalationTrigger,
        reason: &str,
        actor: &str,
    ) -> EngineResult<Incident> {
        if inc.is_terminal() {
            return Err(EngineError::IllegalTransition {
                from: inc.status.as_str().to_string(),
                to: format!("tier:{}", target_tier.label()),
            });
        }
        // Timer-driven escalation only ever advances one tier.
        if trigger == EscalationTrigger::TimerExpired && Some(target_tier) != inc.owning_tier.next()
        {
            return Err(EngineError::IllegalTransition {
                from: format!("tier:{}", inc.owning_tier.label()),
                to: format!("tier:{}", target_tier.label()),
            });
        }
        if target_tier == inc.owning_tier {
            return Ok(inc);
        }

        let now = self.clock.now();
        let from_tier = inc.owning_tier;
        let record = EscalationRecord {
            incident_id: inc.incident_id.clone(),
            from_tier,
            to_tier: target_tier,
            trigger,
            reason: reason.to_string(),
            at: now,
        };

        inc.owning_tier = target_tier;
        inc.response_misses = 0;
        inc.resolution_misses = 0;
        // Per-tier clock restart: the new tier gets one escalation
        // interval, not the full resolution target.
        let due = now + self.policy.for_severity(inc.severity).escalation_interval();
        inc.resolution_deadline = Some(due);
        lock(&self.timers).arm(&inc.incident_id, DeadlineKind::Resolution, due);

        self.store.append_escalation(&record)?;
        self.store.update_incident(&mut inc)?;
        self.record(EngineEvent::TierEscalated {
            incident_id: inc.incident_id.clone(),
            from_tier,
            to_tier: target_tier,
            trigger,
            reason: reason.to_string(),
            at: now,
        })?;
        log::info!(
            "incident {}: tier {} -> {} ({}, by {actor})",
            inc.incident_id,
            from_tier.label(),
            target_tier.label(),
            trigger.as_str()
        );
        Ok(inc)
    }

    // ── Timer consumption ──────────────────────────────────────

    /// Deliver every deadline that has elapsed. Called by the scheduler
    /// loop, or directly by deterministic tests after advancing a
    /// manual clock. Returns the audit events emitted.
    pub fn poll_due(&self) -> EngineResult<Vec<EngineEvent>> {
        let now = self.clock.now();
        let expiries = lock(&self.timers).poll(now);
        let mut emitted = Vec::new();
        for expiry in expiries {
            let (incident_id, kind, due_at) =
                (expiry.incident_id.clone(), expiry.kind, expiry.due_at);
            match self.process_expiry(expiry, now) {
                Ok(events) => emitted.extend(events),
                Err(e) => {
                    // A failure on one incident must not swallow the
                    // rest of the batch. Re-arm the deadline so a later
                    // poll retries it; an expiry already applied before
                    // the failure is discarded as stale on redelivery.
                    log::error!(
                        "processing {} expiry for {incident_id} failed: {e}",
                        kind.as_str()
                    );
                    lock(&self.timers).arm(&incident_id, kind, due_at);
                }
            }
        }
        Ok(emitted)
    }

    fn process_expiry(&self, expiry: Expiry, now: DateTime<Utc>) -> EngineResult<Vec<EngineEvent>> {
        let handle = self.locks.handle(&expiry.incident_id);
        let _guard = lock(&handle);

        let Some(mut inc) = self.store.get_incident(&expiry.incident_id)? else {
            log::warn!("expiry for unknown incident {}", expiry.incident_id);
            return Ok(Vec::new());
        };

        let policy = self.policy.for_severity(inc.severity);
        let decision = escalation::decide(&inc, policy, &expiry);
        let mut emitted = Vec::new();

        let breach = EngineEvent::SlaBreached {
            incident_id: inc.incident_id.clone(),
            kind: expiry.kind,
            tier: inc.owning_tier,
            overdue_seconds: (now - expiry.due_at).num_seconds(),
            at: now,
        };

        match decision {
            Decision::Discard => {
                // Lost the race with a resolution; resolution wins.
                log::debug!(
                    "stale {} expiry discarded for {} (status {})",
                    expiry.kind.as_str(),
                    inc.incident_id,
                    inc.status.as_str()
                );
            }
            Decision::Grace { misses } => {
                self.set_misses(&mut inc, expiry.kind, misses);
                let due = now + policy.escalation_interval();
                match expiry.kind {
                    DeadlineKind::Response => inc.response_deadline = Some(due),
                    DeadlineKind::Resolution => inc.resolution_deadline = Some(due),
                }
                lock(&self.timers).arm(&inc.incident_id, expiry.kind, due);
                self.store.update_incident(&mut inc)?;
                self.record(breach.clone())?;
                emitted.push(breach);
                log::warn!(
                    "SLA breach (grace {misses}/{}) on {}: {} deadline",
                    policy.grace_count,
                    inc.incident_id,
                    expiry.kind.as_str()
                );
            }
            Decision::Escalate { to, .. } => {
                self.record(breach.clone())?;
                emitted.push(breach);
                if expiry.kind == DeadlineKind::Response {
                    // A breached response clock is spent; from here the
                    // re-armed resolution clock drives escalation.
                    inc.response_deadline = None;
                }
                let from_tier = inc.owning_tier;
                let reason = format!("{} deadline expired", expiry.kind.as_str());
                let inc = self.apply_reassignment(
                    inc,
                    to,
                    EscalationTrigger::TimerExpired,
                    &reason,
                    "timer",
                )?;
                emitted.push(EngineEvent::TierEscalated {
                    incident_id: inc.incident_id.clone(),
                    from_tier,
                    to_tier: to,
                    trigger: EscalationTrigger::TimerExpired,
                    reason,
                    at: now,
                });
                let notice = BreachNotice {
                    incident_id: inc.incident_id.clone(),
                    severity: inc.severity,
                    breach_kind: expiry.kind,
                    elapsed: now - inc.detected_at,
                };
                if let Err(e) = self.notifier.notify(to, &notice) {
                    // Fire-and-forget: never an incident-state error.
                    log::warn!("notification to {} failed: {e}", to.label());
                }
            }
            Decision::Exhausted { misses } => {
                self.set_misses(&mut inc, expiry.kind, misses);
                match expiry.kind {
                    DeadlineKind::Response => inc.response_deadline = None,
                    DeadlineKind::Resolution => inc.resolution_deadline = None,
                }
                let first_flag = !inc.executive_flagged;
                inc.executive_flagged = true;
                self.store.update_incident(&mut inc)?;
                self.record(breach.clone())?;
                emitted.push(breach);
                if first_flag {
                    let event = EngineEvent::EscalationExhausted {
                        incident_id: inc.incident_id.clone(),
                        at: now,
                    };
                    self.record(event.clone())?;
                    emitted.push(event);
                    let notice = BreachNotice {
                        incident_id: inc.incident_id.clone(),
                        severity: inc.severity,
                        breach_kind: expiry.kind,
                        elapsed: now - inc.detected_at,
                    };
                    if let Err(e) = self.notifier.notify(Tier::Tier4, &notice) {
                        log::warn!("notification to {} failed: {e}", Tier::Tier4.label());
                    }
                    log::warn!(
                        "incident {} exhausted auto-escalation; flagged for executive/vendor",
                        inc.incident_id
                    );
                }
            }
        }
        Ok(emitted)
    }

    fn set_misses(&self, inc: &mut Incident, kind: DeadlineKind, misses: u32) {
        match kind {
            DeadlineKind::Response => inc.response_misses = misses,
            DeadlineKind::Resolution => inc.resolution_misses = misses,
        }
    }

    // ── Read surface (dashboard/reporting; no mutation path) ───

    pub fn incident(&self, incident_id: &str) -> EngineResult<Incident> {
        self.fetch(incident_id)
    }

    pub fn escalations(&self, incident_id: &str) -> EngineResult<Vec<EscalationRecord>> {
        self.store.escalations_for(incident_id)
    }

    pub fn events(&self, incident_id: &str) -> EngineResult<Vec<EventLogEntry>> {
        self.store.events_for_incident(incident_id)
    }

    pub fn metrics_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<WindowMetrics> {
        let incidents = self.store.incidents_detected_between(start, end)?;
        Ok(metrics::compute(&incidents, start, end))
    }

    pub fn health(&self) -> Health {
        match self.store.ping() {
            Ok(()) => Health::Healthy,
            Err(e) => Health::Degraded {
                reason: e.to_string(),
            },
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        lock(&self.timers).next_due()
    }

    fn fetch(&self, incident_id: &str) -> EngineResult<Incident> {
        self.store
            .get_incident(incident_id)?
            .ok_or_else(|| EngineError::NotFound {
                incident_id: incident_id.to_string(),
            })
    }

    fn record(&self, event: EngineEvent) -> EngineResult<()> {
        self.store.append_event(&event, self.clock.now())
    }
}

/// Spawn the dedicated scheduler loop: a single consumer that waits out
/// the interval and delivers due expiries. Decoupled from request
/// handling; communicates only through the engine's expiry path.
pub fn run_scheduler(
    engine: Arc<Engine>,
    shutdown: Arc<AtomicBool>,
    poll_interval: std::time::Duration,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = engine.poll_due() {
                log::error!("scheduler poll failed: {e}");
            }
            std::thread::sleep(poll_interval);
        }
    })
}
