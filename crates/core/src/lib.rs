// jobwire Core - Job dispatch, handler contract & queue backend ports
// NO infrastructure dependencies: backends live in infra crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{JobRegistry, ManagerSettings, QueueManager};
pub use domain::{DispatchOptions, JobPayload, JobType, QueueConfiguration};
pub use error::{AppError, Result};
pub use port::{Job, JobError, JobHandler, QueueBackend};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
