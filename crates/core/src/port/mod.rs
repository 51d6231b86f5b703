// Port Layer - Interfaces for external collaborators

pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod queue_backend;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use job_handler::{Job, JobError, JobHandler, TypedHandler};
pub use queue_backend::{
    BackendError, ConsumerHandle, DeliveryHandler, QueueBackend, QueueHandle,
};
pub use time_provider::TimeProvider;
