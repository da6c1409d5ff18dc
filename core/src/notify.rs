//! External collaborator seams.
//!
//! The engine calls out through these traits and owns none of the
//! delivery machinery. Notification is fire-and-forget: a failure is
//! logged by the caller, never surfaced as an incident-state error.

use crate::incident::{PirStatus, Severity, Tier};
use crate::timer::DeadlineKind;
use chrono::{DateTime, Duration, Utc};

/// Payload for a breach notification to the newly owning tier.
#[derive(Debug, Clone)]
pub struct BreachNotice {
    pub incident_id: String,
    pub severity: Severity,
    pub breach_kind: DeadlineKind,
    pub elapsed: Duration,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, tier: Tier, notice: &BreachNotice) -> anyhow::Result<()>;
}

pub trait ReviewTracker: Send + Sync {
    fn schedule_review(&self, incident_id: &str, due: DateTime<Utc>) -> anyhow::Result<()>;

    /// The review state on the tracker's side. The engine reconciles a
    /// COMPLETE answer into the incident record; trackers that push
    /// completion through `Engine::complete_review` instead may report
    /// whatever they last scheduled.
    fn review_status(&self, incident_id: &str) -> anyhow::Result<PirStatus>;
}

/// Default collaborator: writes to the log and nothing else. Useful for
/// the runner and for deployments where delivery is wired elsewhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, tier: Tier, notice: &BreachNotice) -> anyhow::Result<()> {
        log::info!(
            "notify {}: incident={} severity={} breach={} elapsed={}m",
            tier.label(),
            notice.incident_id,
            notice.severity.as_str(),
            notice.breach_kind.as_str(),
            notice.elapsed.num_minutes()
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogReviewTracker;

impl ReviewTracker for LogReviewTracker {
    fn schedule_review(&self, incident_id: &str, due: DateTime<Utc>) -> anyhow::Result<()> {
        log::info!("schedule PIR: incident={incident_id} due={due}");
        Ok(())
    }

    /// Stateless: holds no review records, so it reports nothing.
    fn review_status(&self, _incident_id: &str) -> anyhow::Result<PirStatus> {
        Ok(PirStatus::None)
    }
}
