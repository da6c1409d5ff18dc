//! Lifecycle state machine — the single authority on status changes.
//!
//! OPEN -> ACKNOWLEDGED -> IN_PROGRESS -> RESOLVED -> CLOSED, strictly
//! in order; the only backward edge is the reopen transition
//! RESOLVED/CLOSED -> IN_PROGRESS, and only inside the reopen window.
//! The timer engine and escalation coordinator consult this module
//! before altering anything.

use crate::error::{EngineError, EngineResult};
use crate::incident::{Incident, Status};
use chrono::{DateTime, Duration, Utc};

/// Whether `to` is directly reachable from `from`. Reopen edges are
/// included here; the window check happens in `apply_transition`.
pub fn is_legal(from: Status, to: Status) -> bool {
    use Status::*;
    matches!(
        (from, to),
        (Open, Acknowledged)
            | (Acknowledged, InProgress)
            | (InProgress, Resolved)
            | (Resolved, Closed)
            | (Resolved, InProgress)
            | (Closed, InProgress)
    )
}

pub fn is_reopen(from: Status, to: Status) -> bool {
    from.is_terminal() && to == Status::InProgress
}

/// Validate and apply a status change to the record, setting each
/// lifecycle timestamp exactly once. The caller (engine) persists the
/// result and adjusts timers.
pub fn apply_transition(
    incident: &mut Incident,
    target: Status,
    now: DateTime<Utc>,
    reopen_window: Duration,
) -> EngineResult<()> {
    let from = incident.status;
    if !is_legal(from, target) {
        return Err(EngineError::IllegalTransition {
            from: from.as_str().to_string(),
            to: target.as_str().to_string(),
        });
    }

    if is_reopen(from, target) {
        // Reopen window counts from resolution; a closed incident that
        // was never resolved cannot exist by the timestamp invariant.
        let resolved_at = incident
            .resolved_at
            .ok_or_else(|| EngineError::IllegalTransition {
                from: from.as_str().to_string(),
                to: target.as_str().to_string(),
            })?;
        if now - resolved_at > reopen_window {
            return Err(EngineError::StaleReopen {
                incident_id: incident.incident_id.clone(),
                window_hours: reopen_window.num_hours(),
            });
        }
        incident.resolved_at = None;
        incident.closed_at = None;
        incident.status = Status::InProgress;
        return Ok(());
    }

    match target {
        Status::Acknowledged => {
            if incident.acknowledged_at.is_none() {
                incident.acknowledged_at = Some(now);
            }
        }
        Status::Resolved => {
            if incident.resolved_at.is_none() {
                incident.resolved_at = Some(now);
            }
        }
        Status::Closed => {
            if incident.closed_at.is_none() {
                incident.closed_at = Some(now);
            }
        }
        Status::Open | Status::InProgress => {}
    }
    incident.status = target;
    Ok(())
}
