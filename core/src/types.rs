//! Shared primitive types used across the engine.

/// A stable, unique identifier for an incident.
pub type IncidentId = String;

/// The human or system principal that performed an operation.
pub type Actor = String;
