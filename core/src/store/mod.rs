//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database. Engine modules call
//! store methods — they never execute SQL directly.
//!
//! The handle is cloneable: the scheduler thread and request paths
//! share one connection behind a mutex, which also gives the
//! per-statement serialization the audit log relies on.

mod incident;

use crate::error::EngineResult;
use crate::event::{EngineEvent, EventLogEntry};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct EngineStore {
    conn: Arc<Mutex<Connection>>,
}

impl EngineStore {
    /// Open (or create) the incident database at `path`.
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; :memory: ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.lock()
            .execute_batch(include_str!("../../../migrations/001_incidents.sql"))?;
        Ok(())
    }

    /// Cheap liveness probe for the health surface.
    pub fn ping(&self) -> EngineResult<()> {
        self.lock().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; continuing with
        // the connection is still sound for SQLite.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Event log (append-only) ────────────────────────────────

    pub fn append_event(&self, event: &EngineEvent, at: DateTime<Utc>) -> EngineResult<()> {
        let payload = serde_json::to_string(event)?;
        self.lock().execute(
            "INSERT INTO event_log (incident_id, event_type, payload, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.incident_id(),
                event.type_name(),
                payload,
                at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn events_for_incident(&self, incident_id: &str) -> EngineResult<Vec<EventLogEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, event_type, payload, at
             FROM event_log WHERE incident_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![incident_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    incident_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    at: ts(row.get(4)?, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, incident_id: &str, event_type: &str) -> EngineResult<i64> {
        let count = self.lock().query_row(
            "SELECT COUNT(*) FROM event_log WHERE incident_id = ?1 AND event_type = ?2",
            params![incident_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Millisecond column to `DateTime<Utc>`, mapped to a rusqlite
/// conversion error so it surfaces through query_map.
pub(crate) fn ts(millis: i64, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

pub(crate) fn text_column<T>(
    value: Option<T>,
    raw: &str,
    col: usize,
) -> rusqlite::Result<T> {
    value.ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unrecognized value: {raw}").into(),
        )
    })
}
