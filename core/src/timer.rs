//! Timer engine — a min-heap of absolute deadlines.
//!
//! Each (incident, kind) pair carries a monotonic generation counter.
//! Arming or cancelling bumps the generation, which invalidates any
//! entry still sitting in the heap; a popped entry only fires if its
//! generation matches the current one. That gives exactly-once expiry
//! per deadline instance and makes cancellation synchronous: once
//! `cancel` returns, no expiry for the old deadline can be observed.
//!
//! The engine never touches incident state. It surfaces discrete
//! `Expiry` values; the escalation coordinator decides what they mean.

use crate::types::IncidentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    Response,
    Resolution,
}

impl DeadlineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Resolution => "resolution",
        }
    }
}

/// A deadline that elapsed without the corresponding transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub incident_id: IncidentId,
    pub kind: DeadlineKind,
    pub due_at: DateTime<Utc>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    due_at: DateTime<Utc>,
    incident_id: IncidentId,
    kind_is_resolution: bool,
    generation: u64,
}

impl HeapEntry {
    fn kind(&self) -> DeadlineKind {
        if self.kind_is_resolution {
            DeadlineKind::Resolution
        } else {
            DeadlineKind::Response
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerEngine {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    // Current generation per (incident, kind). A heap entry with an
    // older generation is stale and dropped on pop.
    generations: HashMap<(IncidentId, DeadlineKind), u64>,
}

impl TimerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a deadline. Any previously armed deadline of the
    /// same kind for this incident becomes stale.
    pub fn arm(&mut self, incident_id: &str, kind: DeadlineKind, due_at: DateTime<Utc>) -> u64 {
        let generation = self.bump(incident_id, kind);
        self.heap.push(Reverse(HeapEntry {
            due_at,
            incident_id: incident_id.to_string(),
            kind_is_resolution: kind == DeadlineKind::Resolution,
            generation,
        }));
        generation
    }

    /// Cancel a deadline. Stale heap entries are dropped lazily on pop.
    pub fn cancel(&mut self, incident_id: &str, kind: DeadlineKind) {
        self.bump(incident_id, kind);
    }

    pub fn cancel_all(&mut self, incident_id: &str) {
        self.cancel(incident_id, DeadlineKind::Response);
        self.cancel(incident_id, DeadlineKind::Resolution);
    }

    fn bump(&mut self, incident_id: &str, kind: DeadlineKind) -> u64 {
        let key = (incident_id.to_string(), kind);
        let entry = self.generations.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    /// The soonest live deadline, if any. The scheduler loop sleeps
    /// until this instant.
    pub fn next_due(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.is_live(entry) {
                return Some(entry.due_at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every live deadline with `due_at <= now`, each exactly once.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Vec<Expiry> {
        let mut fired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due_at > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if !self.is_live(&entry) {
                continue; // superseded by a re-arm or cancel
            }
            // Consume the generation so a duplicate tick cannot re-fire
            // the same deadline instance.
            self.bump(&entry.incident_id, entry.kind());
            fired.push(Expiry {
                incident_id: entry.incident_id.clone(),
                kind: entry.kind(),
                due_at: entry.due_at,
                generation: entry.generation,
            });
        }
        fired
    }

    fn is_live(&self, entry: &HeapEntry) -> bool {
        self.generations
            .get(&(entry.incident_id.clone(), entry.kind()))
            .copied()
            == Some(entry.generation)
    }

    pub fn pending(&self) -> usize {
        self.heap.len()
    }
}
