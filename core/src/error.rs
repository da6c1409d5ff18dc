use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid severity: '{value}' (expected SEV1..SEV4)")]
    InvalidSeverity { value: String },

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Incident '{incident_id}' not found")]
    NotFound { incident_id: String },

    #[error("Reopen window expired for incident '{incident_id}' ({window_hours}h after resolution); file a new incident")]
    StaleReopen {
        incident_id: String,
        window_hours: i64,
    },

    #[error("Concurrent modification of incident '{incident_id}': expected version {expected}, found {actual}")]
    ConcurrentModification {
        incident_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
