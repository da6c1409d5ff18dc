//! Incident and escalation-history queries.

use super::{text_column, ts, EngineStore};
use crate::error::{EngineError, EngineResult};
use crate::incident::{
    EscalationRecord, EscalationTrigger, Incident, PirStatus, Severity, Status, Tier,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_incident(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let severity_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let tier_rank: i64 = row.get(9)?;
    let pir_raw: String = row.get(17)?;
    Ok(Incident {
        incident_id: row.get(0)?,
        severity: text_column(Severity::parse(&severity_raw).ok(), &severity_raw, 1)?,
        status: text_column(Status::parse(&status_raw), &status_raw, 2)?,
        description: row.get(3)?,
        source: row.get(4)?,
        detected_at: ts(row.get(5)?, 5)?,
        acknowledged_at: opt_ts(row.get(6)?, 6)?,
        resolved_at: opt_ts(row.get(7)?, 7)?,
        closed_at: opt_ts(row.get(8)?, 8)?,
        owning_tier: text_column(Tier::from_rank(tier_rank as u8), &tier_rank.to_string(), 9)?,
        response_deadline: opt_ts(row.get(10)?, 10)?,
        resolution_deadline: opt_ts(row.get(11)?, 11)?,
        original_resolution_deadline: ts(row.get(12)?, 12)?,
        response_misses: row.get::<_, i64>(13)? as u32,
        resolution_misses: row.get::<_, i64>(14)? as u32,
        executive_flagged: row.get::<_, i64>(15)? != 0,
        pir_required: row.get::<_, i64>(16)? != 0,
        pir_status: text_column(PirStatus::parse(&pir_raw), &pir_raw, 17)?,
        pir_due: opt_ts(row.get(18)?, 18)?,
        version: row.get::<_, i64>(19)? as u64,
    })
}

fn opt_ts(millis: Option<i64>, col: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    millis.map(|m| ts(m, col)).transpose()
}

const INCIDENT_COLUMNS: &str = "incident_id, severity, status, description, source,
    detected_at, acknowledged_at, resolved_at, closed_at, owning_tier,
    response_deadline, resolution_deadline, original_resolution_deadline,
    response_misses, resolution_misses, executive_flagged,
    pir_required, pir_status, pir_due, version";

impl EngineStore {
    pub fn insert_incident(&self, inc: &Incident) -> EngineResult<()> {
        self.lock().execute(
            "INSERT INTO incident (incident_id, severity, status, description, source,
                detected_at, acknowledged_at, resolved_at, closed_at, owning_tier,
                response_deadline, resolution_deadline, original_resolution_deadline,
                response_misses, resolution_misses, executive_flagged,
                pir_required, pir_status, pir_due, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                inc.incident_id,
                inc.severity.as_str(),
                inc.status.as_str(),
                inc.description,
                inc.source,
                inc.detected_at.timestamp_millis(),
                inc.acknowledged_at.map(|t| t.timestamp_millis()),
                inc.resolved_at.map(|t| t.timestamp_millis()),
                inc.closed_at.map(|t| t.timestamp_millis()),
                inc.owning_tier.rank() as i64,
                inc.response_deadline.map(|t| t.timestamp_millis()),
                inc.resolution_deadline.map(|t| t.timestamp_millis()),
                inc.original_resolution_deadline.timestamp_millis(),
                inc.response_misses as i64,
                inc.resolution_misses as i64,
                inc.executive_flagged as i64,
                inc.pir_required as i64,
                inc.pir_status.as_str(),
                inc.pir_due.map(|t| t.timestamp_millis()),
                inc.version as i64,
            ],
        )?;
        Ok(())
    }

    /// Persist a mutated record with a compare-and-set on `version`.
    /// On success the in-memory version is bumped to match the row.
    pub fn update_incident(&self, inc: &mut Incident) -> EngineResult<()> {
        let changed = self.lock().execute(
            "UPDATE incident SET severity=?2, status=?3, acknowledged_at=?4,
                resolved_at=?5, closed_at=?6, owning_tier=?7,
                response_deadline=?8, resolution_deadline=?9,
                original_resolution_deadline=?10,
                response_misses=?11, resolution_misses=?12, executive_flagged=?13,
                pir_required=?14, pir_status=?15, pir_due=?16, version=version+1
             WHERE incident_id=?1 AND version=?17",
            params![
                inc.incident_id,
                inc.severity.as_str(),
                inc.status.as_str(),
                inc.acknowledged_at.map(|t| t.timestamp_millis()),
                inc.resolved_at.map(|t| t.timestamp_millis()),
                inc.closed_at.map(|t| t.timestamp_millis()),
                inc.owning_tier.rank() as i64,
                inc.response_deadline.map(|t| t.timestamp_millis()),
                inc.resolution_deadline.map(|t| t.timestamp_millis()),
                inc.original_resolution_deadline.timestamp_millis(),
                inc.response_misses as i64,
                inc.resolution_misses as i64,
                inc.executive_flagged as i64,
                inc.pir_required as i64,
                inc.pir_status.as_str(),
                inc.pir_due.map(|t| t.timestamp_millis()),
                inc.version as i64,
            ],
        )?;
        if changed == 0 {
            let actual: Option<i64> = self.lock()
                .query_row(
                    "SELECT version FROM incident WHERE incident_id=?1",
                    params![inc.incident_id],
                    |row| row.get(0),
                )
                .optional()?;
            return match actual {
                Some(actual) => Err(EngineError::ConcurrentModification {
                    incident_id: inc.incident_id.clone(),
                    expected: inc.version,
                    actual: actual as u64,
                }),
                None => Err(EngineError::NotFound {
                    incident_id: inc.incident_id.clone(),
                }),
            };
        }
        inc.version += 1;
        Ok(())
    }

    pub fn get_incident(&self, incident_id: &str) -> EngineResult<Option<Incident>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incident WHERE incident_id=?1"
        ))?;
        let inc = stmt
            .query_row(params![incident_id], row_to_incident)
            .optional()?;
        Ok(inc)
    }

    /// Incidents that still have live deadlines; used to re-arm timers
    /// after a restart.
    pub fn list_active_incidents(&self) -> EngineResult<Vec<Incident>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incident
             WHERE status NOT IN ('resolved', 'closed')
             ORDER BY detected_at ASC"
        ))?;
        let rows = stmt
            .query_map([], row_to_incident)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Incidents detected inside `[start, end)`, for the metrics
    /// aggregator and the reporting read surface.
    pub fn incidents_detected_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<Incident>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incident
             WHERE detected_at >= ?1 AND detected_at < ?2
             ORDER BY detected_at ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![start.timestamp_millis(), end.timestamp_millis()],
                row_to_incident,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Escalation history (append-only) ───────────────────────

    pub fn append_escalation(&self, record: &EscalationRecord) -> EngineResult<()> {
        self.lock().execute(
            "INSERT INTO escalation (incident_id, from_tier, to_tier, trigger_kind, reason, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.incident_id,
                record.from_tier.rank() as i64,
                record.to_tier.rank() as i64,
                record.trigger.as_str(),
                record.reason,
                record.at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn escalations_for(&self, incident_id: &str) -> EngineResult<Vec<EscalationRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT incident_id, from_tier, to_tier, trigger_kind, reason, at
             FROM escalation WHERE incident_id=?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![incident_id], |row| {
                let from_rank: i64 = row.get(1)?;
                let to_rank: i64 = row.get(2)?;
                let trigger_raw: String = row.get(3)?;
                Ok(EscalationRecord {
                    incident_id: row.get(0)?,
                    from_tier: text_column(
                        Tier::from_rank(from_rank as u8),
                        &from_rank.to_string(),
                        1,
                    )?,
                    to_tier: text_column(Tier::from_rank(to_rank as u8), &to_rank.to_string(), 2)?,
                    trigger: text_column(EscalationTrigger::parse(&trigger_raw), &trigger_raw, 3)?,
                    reason: row.get(4)?,
                    at: ts(row.get(5)?, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn escalation_count(&self, incident_id: &str) -> EngineResult<i64> {
        let count = self.lock().query_row(
            "SELECT COUNT(*) FROM escalation WHERE incident_id=?1",
            params![incident_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
