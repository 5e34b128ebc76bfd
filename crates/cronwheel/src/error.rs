//! Error types for the scheduler core.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors surfaced to clients of the scheduler.
///
/// Failures inside the firing loop or listeners never take this shape —
/// they are logged, reported to scheduler listeners, and the scheduler
/// keeps running.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Keyed insertion without `replace` over an existing object.
    #[error("object already exists: {0}")]
    ObjectAlreadyExists(String),

    /// Registry-level failure (e.g. deleting a calendar still in use).
    #[error("persistence error: {0}")]
    JobPersistence(String),

    /// A referenced key is absent.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A trigger's recurrence yields no future fire time.
    #[error("trigger '{0}' will never fire")]
    TriggerDoesNotFire(String),

    /// Validation failure on trigger fields or a cron expression.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Interruption was requested for a job that does not support it.
    #[error("unable to interrupt job '{0}'")]
    UnableToInterruptJob(String),

    /// The operation requires a scheduler state other than the current one.
    #[error("scheduler state error: {0}")]
    SchedulerState(String),
}

impl From<cronwheel_cron::ParseError> for SchedulerError {
    fn from(e: cronwheel_cron::ParseError) -> Self {
        Self::InvalidConfiguration(e.to_string())
    }
}
