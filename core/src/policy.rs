//! SLA policy table — per-severity targets and escalation behaviour.
//!
//! Loaded once at process start (defaults in code, optional JSON
//! override file); never mutated at runtime.

use crate::error::EngineResult;
use crate::incident::Severity;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Targets for one severity. Durations are stored in minutes so the
/// table serializes plainly; accessors return `chrono::Duration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub response_target_minutes: i64,
    pub resolution_target_minutes: i64,
    /// Interval between tier timeouts: on any tier change the resolution
    /// clock re-arms at now + this, not the full resolution target.
    pub escalation_interval_minutes: i64,
    /// Missed intervals tolerated before escalating. SEV1/SEV2 escalate
    /// on the first miss; SEV3/SEV4 tolerate one.
    pub grace_count: u32,
}

impl SlaPolicy {
    pub fn response_target(&self) -> Duration {
        Duration::minutes(self.response_target_minutes)
    }

    pub fn resolution_target(&self) -> Duration {
        Duration::minutes(self.resolution_target_minutes)
    }

    pub fn escalation_interval(&self) -> Duration {
        Duration::minutes(self.escalation_interval_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTable {
    policies: HashMap<Severity, SlaPolicy>,
    /// Hours after resolution during which an incident may be reopened;
    /// outside this window reopening fails and a new incident is filed.
    pub reopen_window_hours: i64,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            Severity::Sev1,
            SlaPolicy {
                response_target_minutes: 15,
                resolution_target_minutes: 4 * 60,
                escalation_interval_minutes: 60,
                grace_count: 0,
            },
        );
        policies.insert(
            Severity::Sev2,
            SlaPolicy {
                response_target_minutes: 30,
                resolution_target_minutes: 8 * 60,
                escalation_interval_minutes: 2 * 60,
                grace_count: 0,
            },
        );
        policies.insert(
            Severity::Sev3,
            SlaPolicy {
                response_target_minutes: 4 * 60,
                resolution_target_minutes: 24 * 60,
                escalation_interval_minutes: 8 * 60,
                grace_count: 1,
            },
        );
        policies.insert(
            Severity::Sev4,
            SlaPolicy {
                response_target_minutes: 8 * 60,
                resolution_target_minutes: 72 * 60,
                escalation_interval_minutes: 24 * 60,
                grace_count: 1,
            },
        );
        Self {
            policies,
            reopen_window_hours: 72,
        }
    }
}

impl PolicyTable {
    /// Load a policy table from a JSON file, replacing the defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read policy file {}: {e}", path.display()))?;
        let table: PolicyTable = serde_json::from_str(&raw)?;
        Ok(table)
    }

    pub fn for_severity(&self, severity: Severity) -> &SlaPolicy {
        // The table is constructed with all four severities present.
        &self.policies[&severity]
    }

    pub fn reopen_window(&self) -> Duration {
        Duration::hours(self.reopen_window_hours)
    }
}
