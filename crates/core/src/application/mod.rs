// Application Layer - registry, dispatch lifecycle and the consume routine

pub mod manager;
pub mod registry;
pub mod retry;
pub mod worker;

// Re-exports
pub use manager::{ManagerSettings, QueueManager};
pub use registry::{HandlerFactory, JobRegistry};
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, InFlightTracker, QueueWorker, ShutdownSender, ShutdownToken};
