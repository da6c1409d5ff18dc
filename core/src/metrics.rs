//! Metrics aggregator — derived reliability numbers over a time window.
//!
//! Pure read-side computation: nothing here mutates incident state.
//! Empty windows yield `None` rather than dividing by zero.

use crate::incident::{Incident, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub incident_count: usize,
    pub resolved_count: usize,
    /// Mean time to detect: acknowledged_at - detected_at.
    pub mttd_seconds: Option<f64>,
    /// Mean time to resolve, grouped by severity.
    pub mttr_seconds_by_severity: HashMap<Severity, f64>,
    /// Mean inter-arrival time between incidents of the same severity.
    pub mtbf_seconds_by_severity: HashMap<Severity, f64>,
    /// Share of resolved incidents that met their original resolution
    /// deadline (the deadline set at triage, not any re-armed one).
    pub sla_compliance: Option<f64>,
}

/// Compute metrics over incidents detected inside `[start, end)`.
pub fn compute(
    incidents: &[Incident],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> WindowMetrics {
    let in_window: Vec<&Incident> = incidents
        .iter()
        .filter(|i| i.detected_at >= start && i.detected_at < end)
        .collect();

    let detect_latencies: Vec<f64> = in_window
        .iter()
        .filter_map(|i| {
            i.acknowledged_at
                .map(|ack| (ack - i.detected_at).num_milliseconds() as f64 / 1000.0)
        })
        .collect();
    let mttd_seconds = mean(&detect_latencies);

    let mut resolve_by_sev: HashMap<Severity, Vec<f64>> = HashMap::new();
    let mut arrivals_by_sev: HashMap<Severity, Vec<DateTime<Utc>>> = HashMap::new();
    let mut resolved_count = 0usize;
    let mut compliant = 0usize;

    for inc in &in_window {
        arrivals_by_sev
            .entry(inc.severity)
            .or_default()
            .push(inc.detected_at);

        if let Some(resolved) = inc.resolved_at {
            resolved_count += 1;
            if resolved <= inc.original_resolution_deadline {
                compliant += 1;
            }
            resolve_by_sev
                .entry(inc.severity)
                .or_default()
                .push((resolved - inc.detected_at).num_milliseconds() as f64 / 1000.0);
        }
    }

    let mttr_seconds_by_severity = resolve_by_sev
        .into_iter()
        .filter_map(|(sev, v)| mean(&v).map(|m| (sev, m)))
        .collect();

    let mut mtbf_seconds_by_severity = HashMap::new();
    for (sev, mut arrivals) in arrivals_by_sev {
        if arrivals.len() < 2 {
            continue;
        }
        arrivals.sort();
        let gaps: Vec<f64> = arrivals
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        if let Some(m) = mean(&gaps) {
            mtbf_seconds_by_severity.insert(sev, m);
        }
    }

    let sla_compliance = if resolved_count > 0 {
        Some(compliant as f64 / resolved_count as f64)
    } else {
        None
    };

    WindowMetrics {
        window_start: start,
        window_end: end,
        incident_count: in_window.len(),
        resolved_count,
        mttd_seconds,
        mttr_seconds_by_severity,
        mtbf_seconds_by_severity,
        sla_compliance,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{PirStatus, Status, Tier};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn incident(
        id: &str,
        severity: Severity,
        detected_offset_min: i64,
        ack_after_min: Option<i64>,
        resolve_after_min: Option<i64>,
        target_min: i64,
    ) -> Incident {
        let detected = t0() + Duration::minutes(detected_offset_min);
        Incident {
            incident_id: id.into(),
            severity,
            status: if resolve_after_min.is_some() {
                Status::Resolved
            } else {
                Status::Open
            },
            description: "test".into(),
            source: "monitoring".into(),
            detected_at: detected,
            acknowledged_at: ack_after_min.map(|m| detected + Duration::minutes(m)),
            resolved_at: resolve_after_min.map(|m| detected + Duration::minutes(m)),
            closed_at: None,
            owning_tier: Tier::Tier1,
            response_deadline: None,
            resolution_deadline: None,
            original_resolution_deadline: detected + Duration::minutes(target_min),
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
    fn empty_window_reports_no_data() {
        let m = compute(&[], t0(), t0() + Duration::days(1));
        assert_eq!(m.incident_count, 0);
        assert_eq!(m.mttd_seconds, None);
        assert_eq!(m.sla_compliance, None);
        assert!(m.mttr_seconds_by_severity.is_empty());
        assert!(m.mtbf_seconds_by_severity.is_empty());
    }

    #[test]
    fn mttd_averages_detection_latency() {
        let incidents = vec![
            incident("inc-1", Severity::Sev2, 0, Some(10), None, 480),
            incident("inc-2", Severity::Sev2, 60, Some(20), None, 480),
            // No acknowledgement: excluded from MTTD.
            incident("inc-3", Severity::Sev2, 120, None, None, 480),
        ];
        let m = compute(&incidents, t0(), t0() + Duration::days(1));
        assert_eq!(m.mttd_seconds, Some(15.0 * 60.0));
    }

    #[test]
    fn mttr_groups_by_severity() {
        let incidents = vec![
            incident("inc-1", Severity::Sev1, 0, Some(5), Some(60), 240),
            incident("inc-2", Severity::Sev1, 30, Some(5), Some(120), 240),
            incident("inc-3", Severity::Sev3, 60, Some(5), Some(600), 1440),
        ];
        let m = compute(&incidents, t0(), t0() + Duration::days(1));
        assert_eq!(m.mttr_seconds_by_severity[&Severity::Sev1], 90.0 * 60.0);
        assert_eq!(m.mttr_seconds_by_severity[&Severity::Sev3], 600.0 * 60.0);
    }

    #[test]
    fn mtbf_uses_interarrival_gaps_per_severity() {
        let incidents = vec![
            incident("inc-1", Severity::Sev2, 0, None, None, 480),
            incident("inc-2", Severity::Sev2, 60, None, None, 480),
            incident("inc-3", Severity::Sev2, 180, None, None, 480),
            // A single SEV1 has no gap to measure.
            incident("inc-4", Severity::Sev1, 10, None, None, 240),
        ];
        let m = compute(&incidents, t0(), t0() + Duration::days(1));
        assert_eq!(m.mtbf_seconds_by_severity[&Severity::Sev2], 90.0 * 60.0);
        assert!(!m.mtbf_seconds_by_severity.contains_key(&Severity::Sev1));
    }

    #[test]
    fn compliance_measured_against_original_deadline() {
        let incidents = vec![
            // Met: resolved in 60m against a 240m target.
            incident("inc-1", Severity::Sev1, 0, Some(5), Some(60), 240),
            // Missed: resolved in 300m against a 240m target.
            incident("inc-2", Severity::Sev1, 10, Some(5), Some(300), 240),
        ];
        let m = compute(&incidents, t0(), t0() + Duration::days(1));
        assert_eq!(m.sla_compliance, Some(0.5));
    }

    #[test]
    fn out_of_window_incidents_are_ignored() {
        let incidents = vec![
            incident("inc-1", Severity::Sev2, 0, Some(10), Some(60), 480),
            incident("inc-2", Severity::Sev2, 60 * 48, Some(10), Some(60), 480),
        ];
        let m = compute(&incidents, t0(), t0() + Duration::days(1));
        assert_eq!(m.incident_count, 1);
    }
}
