// Queue Backend Port
// Abstraction boundary isolating the external queue technology.
// Delivery guarantees (at-least-once, redelivery, dead-lettering) are owned by
// the implementation, never by the dispatcher.

pub mod mocks;

use crate::domain::{
    ConnectionParams, Delivery, DeliveryOutcome, DispatchOptions, JobPayload, JobType, MessageId,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Queue backend unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Queue closed: {0}")]
    Closed(String),

    #[error("Queue not created: {0}")]
    UnknownQueue(String),

    #[error("Queue already has a consumer: {0}")]
    AlreadyConsuming(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Opaque handle to a queue created by a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    name: String,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Opaque handle to a running consumer loop
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerHandle {
    id: String,
    queue: String,
}

impl ConsumerHandle {
    pub fn new(id: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Callback invoked by a backend once per delivered message
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Process a delivery; the returned outcome drives ack / nack
    async fn on_message(&self, delivery: Delivery) -> DeliveryOutcome;
}

/// Queue backend trait
///
/// Implementations:
/// - InMemoryQueueBackend: process-local channels (tests, single process)
/// - SqliteQueueBackend: durable queue table (infra-sqlite crate)
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create (or connect to) a named queue
    ///
    /// # Errors
    /// - BackendError::QueueUnavailable if the backend cannot be reached
    async fn create_queue(
        &self,
        name: &str,
        connection: &ConnectionParams,
    ) -> Result<QueueHandle, BackendError>;

    /// Enqueue a job; returns once the backend has accepted the message
    ///
    /// # Errors
    /// - BackendError::QueueUnavailable if the backend cannot be reached
    /// - BackendError::Closed if the queue handle was closed
    async fn enqueue(
        &self,
        queue: &QueueHandle,
        job_type: &JobType,
        payload: JobPayload,
        options: &DispatchOptions,
    ) -> Result<MessageId, BackendError>;

    /// Start delivering messages of `queue` to `handler`
    async fn consume(
        &self,
        queue: &QueueHandle,
        connection: &ConnectionParams,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, BackendError>;

    /// Stop delivering new messages. In-flight callbacks keep running and are
    /// still settled (acked / nacked) when they finish.
    async fn close_consumer(&self, consumer: ConsumerHandle) -> Result<(), BackendError>;

    /// Release the queue; later enqueues on this handle fail
    async fn close_queue(&self, queue: QueueHandle) -> Result<(), BackendError>;
}
