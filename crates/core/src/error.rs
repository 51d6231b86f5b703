// Central Error Type for the Application

use crate::domain::QueueState;
use crate::port::BackendError;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Fatal, startup-only
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Dispatch-time, caller-visible
    #[error("Queue [{0}] does not exist")]
    UnknownQueue(String),

    /// Consume-time, reported to the backend as a failed delivery
    #[error("No handler registered for job type [{0}]")]
    UnregisteredJobType(String),

    #[error("Job type [{0}] is already registered")]
    DuplicateJobType(String),

    #[error("Queue [{queue}] is not accepting jobs (state: {state})")]
    QueueNotAccepting { queue: String, state: QueueState },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
