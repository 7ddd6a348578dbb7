//! Domain errors for the Shepherd delivery orchestrator.

use thiserror::Error;

use crate::domain::models::{IssueId, Stage};

/// Domain-level errors that can occur while driving a workflow.
///
/// These surface infrastructure faults (persistence, serialization) and
/// misuse of the public surface. Stage failures, retries and timeouts are
/// not errors at this level: they are carried by `StageResult` and
/// recorded on the issue.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Issue not found: {0}")]
    IssueNotFound(IssueId),

    #[error("Issue {0} already has an active workflow")]
    AlreadyActive(IssueId),

    #[error("Invalid state transition from {from} on {trigger}: {reason}")]
    InvalidStateTransition {
        from: Stage,
        trigger: String,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
