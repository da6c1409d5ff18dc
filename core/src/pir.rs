//! Post-incident review trigger.
//!
//! Evaluated on every transition into RESOLVED or CLOSED. A review is
//! required for every SEV1, and for SEV2 when resolution took longer
//! than four hours. Due dates count business days (weekends skipped)
//! from detection. SCHEDULED -> COMPLETE only happens on an explicit
//! external completion signal; closure never implies completion.

use crate::incident::{Incident, Severity};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

const SEV2_PIR_THRESHOLD_HOURS: i64 = 4;
const SEV1_DUE_BUSINESS_DAYS: u32 = 5;
const SEV2_DUE_BUSINESS_DAYS: u32 = 10;

/// Whether this incident requires a review. Only meaningful once
/// `resolved_at` is set.
pub fn review_required(incident: &Incident) -> bool {
    match incident.severity {
        Severity::Sev1 => true,
        Severity::Sev2 => incident
            .resolved_at
            .map(|resolved| {
                resolved - incident.detected_at > Duration::hours(SEV2_PIR_THRESHOLD_HOURS)
            })
            .unwrap_or(false),
        Severity::Sev3 | Severity::Sev4 => false,
    }
}

/// Review due date for a required PIR: detection plus five (SEV1) or
/// ten (SEV2) business days.
pub fn review_due(incident: &Incident) -> DateTime<Utc> {
    let days = match incident.severity {
        Severity::Sev1 => SEV1_DUE_BUSINESS_DAYS,
        _ => SEV2_DUE_BUSINESS_DAYS,
    };
    add_business_days(incident.detected_at, days)
}

pub fn add_business_days(from: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let mut current = from;
    let mut remaining = days;
    while remaining > 0 {
        current += Duration::days(1);
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{PirStatus, Status, Tier};
    use chrono::TimeZone;

    fn resolved_incident(severity: Severity, resolution_hours: i64) -> Incident {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Incident {
            incident_id: "inc-pir".into(),
            severity,
            status: Status::Resolved,
            description: "outage".into(),
            source: "monitoring".into(),
            detected_at: t0,
            acknowledged_at: Some(t0 + Duration::minutes(10)),
            resolved_at: Some(t0 + Duration::hours(resolution_hours)),
            closed_at: None,
            owning_tier: Tier::Tier1,
            response_deadline: None,
            resolution_deadline: None,
            original_resolution_deadline: t0 + Duration::hours(8),
            response_misses: 0,
            resolution_misses: 0,
            executive_flagged: false,
            pir_required: false,
            pir_status: PirStatus::None,
            pir_due: None,
            version: 0,
        }
    }

    #[test]
    fn sev1_always_requires_review() {
        assert!(review_required(&resolved_incident(Severity::Sev1, 1)));
    }

    #[test]
    fn sev2_requires_review_only_past_four_hours() {
        assert!(!review_required(&resolved_incident(Severity::Sev2, 3)));
        assert!(review_required(&resolved_incident(Severity::Sev2, 5)));
    }

    #[test]
    fn low_severities_never_require_review() {
        assert!(!review_required(&resolved_incident(Severity::Sev3, 48)));
        assert!(!review_required(&resolved_incident(Severity::Sev4, 96)));
    }

    #[test]
    fn business_days_skip_weekends() {
        // 2023-11-17 is a Friday.
        let friday = Utc.with_ymd_and_hms(2023, 11, 17, 9, 0, 0).unwrap();
        let due = add_business_days(friday, 5);
        // Mon 20, Tue 21, Wed 22, Thu 23, Fri 24.
        assert_eq!(due, Utc.with_ymd_and_hms(2023, 11, 24, 9, 0, 0).unwrap());
        assert_ne!(due.weekday(), Weekday::Sat);
    }

    #[test]
    fn due_dates_differ_by_severity() {
        let sev1 = resolved_incident(Severity::Sev1, 1);
        let sev2 = resolved_incident(Severity::Sev2, 6);
        assert!(review_due(&sev1) < review_due(&sev2));
    }
}
