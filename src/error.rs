use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input. The caller can correct it and try again.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not legal in the poll's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A vote already exists for this (poll, voter) pair. Usually means an
    /// earlier submission succeeded.
    #[error("voter {voter_id} has already voted on poll {poll_id}")]
    AlreadyVoted { poll_id: String, voter_id: String },

    #[error("voter {voter_id} has already responded to survey {survey_id}")]
    AlreadyResponded { survey_id: String, voter_id: String },

    /// Optimistic update lost a race. Retried internally, not surfaced by the
    /// ledger or catalog.
    #[error("concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict(_))
    }

    /// True when the error means "your vote (or survey response) was already
    /// recorded".
    pub fn already_recorded(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyVoted { .. } | EngineError::AlreadyResponded { .. }
        )
    }

    pub(crate) fn poll_not_found(poll_id: &str) -> Self {
        EngineError::NotFound(format!("poll {}", poll_id))
    }

    pub(crate) fn survey_not_found(survey_id: &str) -> Self {
        EngineError::NotFound(format!("survey {}", survey_id))
    }
}

// SQLite primary result codes for SQLITE_BUSY / SQLITE_LOCKED and their
// extended variants (BUSY_RECOVERY, BUSY_SNAPSHOT, LOCKED_SHAREDCACHE).
const SQLITE_CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517"];

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => {
                let contended = db_err
                    .code()
                    .map(|code| SQLITE_CONTENTION_CODES.contains(&code.as_ref()))
                    .unwrap_or(false);
                if contended {
                    EngineError::ConcurrencyConflict(db_err.message().to_string())
                } else {
                    EngineError::Storage(e.to_string())
                }
            }
            sqlx::Error::RowNotFound => EngineError::NotFound("row".to_string()),
            _ => EngineError::Storage(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("failed to encode/decode stored value: {}", e))
    }
}

impl From<chrono::ParseError> for EngineError {
    fn from(e: chrono::ParseError) -> Self {
        EngineError::Storage(format!("failed to parse stored timestamp: {}", e))
    }
}
