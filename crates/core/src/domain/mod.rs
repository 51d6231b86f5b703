// Domain Layer - Pure data and rules, no I/O

pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use config::{ConnectionParams, QueueConfiguration, QueueOptions};
pub use dispatch::DispatchOptions;
pub use error::DomainError;
pub use job::{Delivery, DeliveryOutcome, JobPayload, JobType, MessageId};
pub use queue::{QueueName, QueueState};
