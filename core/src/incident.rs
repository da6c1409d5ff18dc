//! Incident data model: severity, tier, status, and the record itself.
//!
//! Mutation happens only through the lifecycle module; everything here
//! is plain data plus parsing and ordering helpers.

use crate::error::{EngineError, EngineResult};
use crate::types::IncidentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels, critical to cosmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Sev1,
    Sev2,
    Sev3,
    Sev4,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Sev1, Self::Sev2, Self::Sev3, Self::Sev4];

    pub fn parse(value: &str) -> EngineResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SEV1" => Ok(Self::Sev1),
            "SEV2" => Ok(Self::Sev2),
            "SEV3" => Ok(Self::Sev3),
            "SEV4" => Ok(Self::Sev4),
            _ => Err(EngineError::InvalidSeverity {
                value: value.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sev1 => "SEV1",
            Self::Sev2 => "SEV2",
            Self::Sev3 => "SEV3",
            Self::Sev4 => "SEV4",
        }
    }
}

/// Support tiers, ordered. Ownership only moves forward through this
/// order except via an explicit manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl Tier {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
            Self::Tier3 => 3,
            Self::Tier4 => 4,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::Tier1),
            2 => Some(Self::Tier2),
            3 => Some(Self::Tier3),
            4 => Some(Self::Tier4),
            _ => None,
        }
    }

    /// The next tier up, or `None` at TIER_4 (terminal — executive and
    /// vendor involvement is flagged instead of auto-escalated).
    pub fn next(&self) -> Option<Self> {
        Self::from_rank(self.rank() + 1)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Tier1 => "service_desk",
            Self::Tier2 => "application_support",
            Self::Tier3 => "engineering",
            Self::Tier4 => "executive_vendor",
        }
    }
}

/// Lifecycle states. The legal transition graph lives in the lifecycle
/// module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    Acknowledged,
    InProgress,
    Resolved,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "acknowledged" => Some(Self::Acknowledged),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PirStatus {
    None,
    Scheduled,
    Complete,
}

impl PirStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Scheduled => "scheduled",
            Self::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "scheduled" => Some(Self::Scheduled),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Why a tier reassignment happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    TimerExpired,
    Manual,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimerExpired => "timer_expired",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "timer_expired" => Some(Self::TimerExpired),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One entry in an incident's append-only escalation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub incident_id: IncidentId,
    pub from_tier: Tier,
    pub to_tier: Tier,
    pub trigger: EscalationTrigger,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// The incident record as persisted.
///
/// `version` increments on every write; callers that track a version
/// independently can detect concurrent modification. The miss counters
/// implement the per-severity grace count from the policy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: IncidentId,
    pub severity: Severity,
    pub status: Status,
    pub description: String,
    pub source: String,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub owning_tier: Tier,
    pub response_deadline: Option<DateTime<Utc>>,
    pub resolution_deadline: Option<DateTime<Utc>>,
    /// Captured at creation (and on re-triage); SLA compliance is always
    /// measured against this, never the re-armed post-escalation deadline.
    pub original_resolution_deadline: DateTime<Utc>,
    pub response_misses: u32,
    pub resolution_misses: u32,
    /// Set when TIER_4 breaches a deadline: terminal escalation state,
    /// flagged for manual executive/vendor involvement.
    pub executive_flagged: bool,
    pub pir_required: bool,
    pub pir_status: PirStatus,
    pub pir_due: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Incident {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
