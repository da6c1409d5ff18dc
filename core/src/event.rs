//! Audit events — every state change the engine makes is recorded.
//!
//! RULE: the event log is append-only. Variants are added over time,
//! never removed or reordered; retention is measured in years.

use crate::incident::{EscalationTrigger, Severity, Status, Tier};
use crate::timer::DeadlineKind;
use crate::types::{Actor, IncidentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    IncidentCreated {
        incident_id: IncidentId,
        severity: Severity,
        tier: Tier,
        detected_at: DateTime<Utc>,
    },
    IncidentRetriaged {
        incident_id: IncidentId,
        old_severity: Severity,
        new_severity: Severity,
        actor: Actor,
        at: DateTime<Utc>,
    },
    StatusChanged {
        incident_id: IncidentId,
        from: Status,
        to: Status,
        actor: Actor,
        at: DateTime<Utc>,
    },
    IncidentReopened {
        incident_id: IncidentId,
        from: Status,
        actor: Actor,
        at: DateTime<Utc>,
    },
    SlaBreached {
        incident_id: IncidentId,
        kind: DeadlineKind,
        tier: Tier,
        overdue_seconds: i64,
        at: DateTime<Utc>,
    },
    TierEscalated {
        incident_id: IncidentId,
        from_tier: Tier,
        to_tier: Tier,
        trigger: EscalationTrigger,
        reason: String,
        at: DateTime<Utc>,
    },
    EscalationExhausted {
        incident_id: IncidentId,
        at: DateTime<Utc>,
    },
    PirScheduled {
        incident_id: IncidentId,
        due: DateTime<Utc>,
    },
    PirCompleted {
        incident_id: IncidentId,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::IncidentCreated { .. } => "incident_created",
            Self::IncidentRetriaged { .. } => "incident_retriaged",
            Self::StatusChanged { .. } => "status_changed",
            Self::IncidentReopened { .. } => "incident_reopened",
            Self::SlaBreached { .. } => "sla_breached",
            Self::TierEscalated { .. } => "tier_escalated",
            Self::EscalationExhausted { .. } => "escalation_exhausted",
            Self::PirScheduled { .. } => "pir_scheduled",
            Self::PirCompleted { .. } => "pir_completed",
        }
    }

    pub fn incident_id(&self) -> &IncidentId {
        match self {
            Self::IncidentCreated { incident_id, .. }
            | Self::IncidentRetriaged { incident_id, .. }
            | Self::StatusChanged { incident_id, .. }
            | Self::IncidentReopened { incident_id, .. }
            | Self::SlaBreached { incident_id, .. }
            | Self::TierEscalated { incident_id, .. }
            | Self::EscalationExhausted { incident_id, .. }
            | Self::PirScheduled { incident_id, .. }
            | Self::PirCompleted { incident_id, .. } => incident_id,
        }
    }
}

/// An event-log row as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub incident_id: Option<IncidentId>,
    pub event_type: String,
    pub payload: String, // JSON-serialized EngineEvent
    pub at: DateTime<Utc>,
}
