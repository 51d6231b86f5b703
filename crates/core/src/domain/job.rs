// Job Domain Model

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Message ID assigned by the backend on enqueue (UUID v4)
pub type MessageId = String;

/// Job Type: routing key linking a dispatched message to its handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for JobType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job Payload (JSON serializable, opaque to the dispatcher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Serialize any value into a payload
    pub fn from_serializable<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for JobPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A single message handed by a backend to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: MessageId,
    pub queue: String,
    pub job_type: JobType,
    pub payload: JobPayload,
    /// 1-based delivery attempt
    pub attempt: u32,
}

impl Delivery {
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        job_type: JobType,
        payload: JobPayload,
        attempt: u32,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            job_type,
            payload,
            attempt,
        }
    }
}

/// Result of processing a delivery, reported back to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Ack: processed (or deliberately skipped)
    Completed,
    /// Nack: backend applies its own redelivery / dead-letter policy
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DeliveryOutcome::Completed)
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Completed => write!(f, "COMPLETED"),
            DeliveryOutcome::Failed(reason) => write!(f, "FAILED ({})", reason),
        }
    }
}
