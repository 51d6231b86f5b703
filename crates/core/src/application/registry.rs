// Job Registry - explicit job type -> handler factory mapping

use crate::domain::JobType;
use crate::error::{AppError, Result};
use crate::port::{Job, JobHandler, TypedHandler};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh handler instance for one delivery
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

/// Registry of handler factories, populated before the QueueManager is built
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<JobType, HandlerFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untyped handler factory
    ///
    /// # Errors
    /// - AppError::DuplicateJobType if `job_type` already has a factory
    pub fn register<F, H>(&mut self, job_type: impl Into<JobType>, factory: F) -> Result<()>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        if self.factories.contains_key(&job_type) {
            return Err(AppError::DuplicateJobType(job_type.to_string()));
        }
        let factory: HandlerFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn JobHandler>);
        self.factories.insert(job_type, factory);
        Ok(())
    }

    /// Register a typed job under `J::NAME`
    pub fn register_job<J, F>(&mut self, factory: F) -> Result<()>
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.register(J::NAME, move || TypedHandler::new(factory()))
    }

    /// Build a new handler for `job_type`
    ///
    /// # Errors
    /// - AppError::UnregisteredJobType if no factory exists
    pub fn resolve(&self, job_type: &str) -> Result<Arc<dyn JobHandler>> {
        self.factories
            .get(job_type)
            .map(|factory| factory())
            .ok_or_else(|| AppError::UnregisteredJobType(job_type.to_string()))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
