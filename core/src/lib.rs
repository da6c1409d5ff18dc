//! oncall-core — incident classification, SLA timers, and escalation.
//!
//! The engine owns the incident lifecycle: intake assigns a severity,
//! SLA clocks start from the policy table, deadline expiry routes
//! through the escalation coordinator, and terminal incidents feed the
//! PIR trigger and the metrics aggregator.
//!
//! RULES:
//!   - The lifecycle module is the single authority on status and tier
//!     writes; timers and escalation never touch incident state directly.
//!   - Only the store module talks to the database.
//!   - Every state change lands in the append-only event log.

pub mod clock;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod event;
pub mod incident;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod pir;
pub mod policy;
pub mod store;
pub mod timer;
pub mod types;
