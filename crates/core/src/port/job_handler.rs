// Job Handler Port
// The polymorphic unit of work, one implementation per job type

use crate::domain::{JobPayload, JobType};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by job hooks
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        JobError::Other(Box::new(err))
    }
}

/// Untyped handler contract, invoked by the worker with the raw JSON payload
///
/// Hook order per delivery: `should_send` -> `handle` -> `on_success` | `on_failure`.
/// Errors from `on_success` / `on_failure` are logged and discarded by the worker.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Whether this delivery should be processed at all (default: always)
    async fn should_send(&self, _payload: &JobPayload) -> Result<bool, JobError> {
        Ok(true)
    }

    /// Run the job
    async fn handle(&self, payload: &JobPayload) -> Result<(), JobError>;

    /// Called once when `handle` fails, with the original error
    async fn on_failure(&self, _error: &JobError, _payload: &JobPayload) -> Result<(), JobError> {
        Ok(())
    }

    /// Called once after `handle` succeeds
    async fn on_success(&self, _payload: &JobPayload) -> Result<(), JobError> {
        Ok(())
    }
}

/// Typed job definition
///
/// `NAME` is the job type used for routing; payloads are (de)serialized as JSON.
///
/// # Example
/// ```text
/// struct SendWelcomeEmail;
///
/// #[async_trait]
/// impl Job for SendWelcomeEmail {
///     const NAME: &'static str = "SendWelcomeEmail";
///     type Payload = Welcome;
///
///     async fn handle(&self, payload: &Welcome) -> Result<(), JobError> { ... }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    const NAME: &'static str;

    type Payload: Serialize + DeserializeOwned + Send + Sync;

    async fn should_send(&self, _payload: &Self::Payload) -> Result<bool, JobError> {
        Ok(true)
    }

    async fn handle(&self, payload: &Self::Payload) -> Result<(), JobError>;

    async fn on_failure(&self, _error: &JobError, _payload: &Self::Payload) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_success(&self, _payload: &Self::Payload) -> Result<(), JobError> {
        Ok(())
    }

    fn job_type() -> JobType
    where
        Self: Sized,
    {
        JobType::new(Self::NAME)
    }
}

/// Adapts a typed `Job` to the untyped `JobHandler` contract
pub struct TypedHandler<J> {
    job: J,
}

impl<J: Job> TypedHandler<J> {
    pub fn new(job: J) -> Self {
        Self { job }
    }

    fn decode(payload: &JobPayload) -> Result<J::Payload, JobError> {
        Ok(serde_json::from_value(payload.as_value().clone())?)
    }
}

#[async_trait]
impl<J: Job> JobHandler for TypedHandler<J> {
    async fn should_send(&self, payload: &JobPayload) -> Result<bool, JobError> {
        let payload = Self::decode(payload)?;
        self.job.should_send(&payload).await
    }

    async fn handle(&self, payload: &JobPayload) -> Result<(), JobError> {
        let payload = Self::decode(payload)?;
        self.job.handle(&payload).await
    }

    async fn on_failure(&self, error: &JobError, payload: &JobPayload) -> Result<(), JobError> {
        let payload = Self::decode(payload)?;
        self.job.on_failure(error, &payload).await
    }

    async fn on_success(&self, payload: &JobPayload) -> Result<(), JobError> {
        let payload = Self::decode(payload)?;
        self.job.on_success(&payload).await
    }
}
