//! Store errors

use steward_core::{AuditIntegrityError, StateTransitionError, ValidationError};

/// Errors returned by [`crate::SqliteStore`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON column could not be encoded or decoded
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure while opening the database
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was cancelled
    #[error("task join error: {0}")]
    Join(String),

    /// Row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness constraint hit by a concurrent writer
    #[error("conflict: {0}")]
    Conflict(String),

    /// Status change refused; the row is unchanged
    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    /// Write refused by a domain rule; the row is unchanged
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The audit chain does not verify
    #[error("audit chain broken: {0}")]
    Integrity(#[from] AuditIntegrityError),
}

impl StoreError {
    /// Whether this is a missing-row error
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Stored text that does not decode to a known value
#[derive(Debug, thiserror::Error)]
#[error("unrecognized {what}: {value:?}")]
pub(crate) struct UnknownValue {
    pub(crate) what: &'static str,
    pub(crate) value: String,
}
