//! Escalation coordinator — turns delivered deadline expiries into tier
//! decisions.
//!
//! Severity controls aggressiveness through the policy table's grace
//! count: SEV1 escalates on the first missed deadline, SEV3/SEV4
//! tolerate one missed interval first. TIER_4 is terminal: a breach
//! there flags the incident for manual executive/vendor involvement
//! instead of escalating further.
//!
//! The coordinator never writes incident state itself; the engine
//! applies the decision through the lifecycle's reassignment path.

use crate::incident::{Incident, Tier};
use crate::policy::SlaPolicy;
use crate::timer::{DeadlineKind, Expiry};

/// What to do about one delivered expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Incident already resolved/closed when the expiry was processed
    /// (lost race with a human). Resolution wins; not an error.
    Discard,
    /// Inside the grace allowance: record the miss and re-arm the same
    /// deadline one escalation interval out.
    Grace { misses: u32 },
    /// Move ownership to the next tier.
    Escalate { to: Tier, misses: u32 },
    /// TIER_4 breached: flag for executive/vendor involvement.
    Exhausted { misses: u32 },
}

pub fn decide(incident: &Incident, policy: &SlaPolicy, expiry: &Expiry) -> Decision {
    if incident.is_terminal() {
        return Decision::Discard;
    }

    // An expiry popped just before a transition cancelled or re-armed
    // its deadline no longer matches the record; it is stale.
    let armed = match expiry.kind {
        DeadlineKind::Response => incident.response_deadline,
        DeadlineKind::Resolution => incident.resolution_deadline,
    };
    if armed != Some(expiry.due_at) {
        return Decision::Discard;
    }

    let misses = match expiry.kind {
        DeadlineKind::Response => incident.response_misses + 1,
        DeadlineKind::Resolution => incident.resolution_misses + 1,
    };

    if misses <= policy.grace_count {
        return Decision::Grace { misses };
    }

    match incident.owning_tier.next() {
        Some(to) => Decision::Escalate { to, misses },
        None => Decision::Exhausted { misses },
    }
}
