// Queue Domain Model

use crate::domain::error::{DomainError, Result};
use std::fmt;

/// Queue identifier
pub type QueueName = String;

/// Maximum queue name length
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Lifecycle of a queue instance owned by the QueueManager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    Uninitialized,
    Initializing,
    Ready,
    Draining,
    Closed,
}

impl QueueState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: QueueState) -> bool {
        use QueueState::*;
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Uninitialized, Closed)
                | (Initializing, Ready)
                | (Initializing, Closed)
                | (Ready, Draining)
                | (Draining, Closed)
        )
    }

    /// Transition in place, rejecting illegal moves
    pub fn transition(&mut self, queue: &str, next: QueueState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                queue: queue.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Only Ready queues accept new enqueues
    pub fn accepts_dispatch(self) -> bool {
        self == QueueState::Ready
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Uninitialized => write!(f, "UNINITIALIZED"),
            QueueState::Initializing => write!(f, "INITIALIZING"),
            QueueState::Ready => write!(f, "READY"),
            QueueState::Draining => write!(f, "DRAINING"),
            QueueState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Validate a queue name: non-empty, bounded, `[A-Za-z0-9_.-]`
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DomainError::InvalidQueueName(
            "queue name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(DomainError::InvalidQueueName(format!(
            "queue name too long: {} chars (max {})",
            name.len(),
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(DomainError::InvalidQueueName(format!(
            "queue name must be alphanumeric (with _ - .): {}",
            name
        )));
    }
    Ok(())
}
