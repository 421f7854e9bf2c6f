//! Error types for timetable-engine operations.

use thiserror::Error;

use crate::conflict::ConflictReport;

#[derive(Error, Debug)]
pub enum TimetableError {
    /// Malformed input: bad period, weekend date, empty identifier, ...
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The write would double-book at least one class, teacher or room.
    #[error("Conflict: {0}")]
    Conflict(ConflictReport),

    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid school calendar: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl TimetableError {
    /// Whether retrying the same request unchanged may succeed.
    ///
    /// Only transient persistence failures qualify; validation errors,
    /// conflicts and missing targets need a different request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TimetableError::Storage(StoreError::Unavailable(_)))
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        TimetableError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Failures raised by a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend busy, locked or timed out. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other failure reported by the backend's driver.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                return StoreError::Unavailable(err.to_string());
            }
        }
        StoreError::Backend(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, TimetableError>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
