// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid queue state transition for {queue}: {from} -> {to}")]
    InvalidStateTransition {
        queue: String,
        from: String,
        to: String,
    },

    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
