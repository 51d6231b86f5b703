// Queue Manager - owns named queues, routes dispatches, binds consumers to handlers

use crate::application::registry::JobRegistry;
use crate::application::worker::constants::DEFAULT_DRAIN_TIMEOUT;
use crate::application::worker::{InFlightTracker, QueueWorker};
use crate::domain::{
    ConnectionParams, DispatchOptions, JobPayload, JobType, MessageId, QueueConfiguration,
    QueueState,
};
use crate::error::{AppError, Result};
use crate::port::{ConsumerHandle, Job, QueueBackend, QueueHandle};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Tuning for the manager itself (backend tuning lives in ConnectionParams)
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Upper bound on how long shutdown waits for in-flight deliveries
    pub drain_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live queue + consumer pair
struct QueueInstance {
    name: String,
    connection: ConnectionParams,
    state: Mutex<QueueState>,
    queue_handle: Mutex<Option<QueueHandle>>,
    consumer_handle: Mutex<Option<ConsumerHandle>>,
    in_flight: InFlightTracker,
}

impl QueueInstance {
    fn new(name: String, connection: ConnectionParams) -> Self {
        Self {
            name,
            connection,
            state: Mutex::new(QueueState::Uninitialized),
            queue_handle: Mutex::new(None),
            consumer_handle: Mutex::new(None),
            in_flight: InFlightTracker::new(),
        }
    }

    fn state(&self) -> QueueState {
        *lock(&self.state)
    }

    fn transition(&self, next: QueueState) -> Result<()> {
        lock(&self.state).transition(&self.name, next)?;
        debug!(queue = %self.name, state = %next, "Queue state changed");
        Ok(())
    }

    fn queue_handle(&self) -> Option<QueueHandle> {
        lock(&self.queue_handle).clone()
    }
}

/// Queue Manager
///
/// Lifecycle: `new` -> `initialize` -> `dispatch`* -> `shutdown`.
/// Handlers are registered on the JobRegistry before it is handed to `new`.
pub struct QueueManager {
    config: Arc<QueueConfiguration>,
    registry: Arc<JobRegistry>,
    backend: Arc<dyn QueueBackend>,
    settings: ManagerSettings,
    queues: BTreeMap<String, QueueInstance>,
}

impl QueueManager {
    pub fn new(
        config: QueueConfiguration,
        registry: JobRegistry,
        backend: Arc<dyn QueueBackend>,
    ) -> Self {
        let queues = config
            .queues
            .iter()
            .map(|(name, options)| {
                (
                    name.clone(),
                    QueueInstance::new(name.clone(), options.connection.clone()),
                )
            })
            .collect();

        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            backend,
            settings: ManagerSettings::default(),
            queues,
        }
    }

    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Create every configured queue and start its consumer
    ///
    /// Startup is all-or-nothing: on any failure the queues opened so far are
    /// closed and the error is returned.
    ///
    /// # Errors
    /// - AppError::Configuration if the configuration is malformed
    /// - AppError::Backend if a queue or consumer cannot be created
    /// - AppError::InvalidState if called more than once
    pub async fn initialize(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        if let Some(queue) = self
            .queues
            .values()
            .find(|q| q.state() != QueueState::Uninitialized)
        {
            return Err(AppError::InvalidState(format!(
                "queue manager already initialized (queue {} is {})",
                queue.name,
                queue.state()
            )));
        }

        info!(
            queues = self.queues.len(),
            default_queue = %self.config.default_queue,
            job_types = self.registry.len(),
            "Initializing queues"
        );

        for queue in self.queues.values() {
            if let Err(e) = self.start_queue(queue).await {
                error!(queue = %queue.name, error = %e, "Queue initialization failed, rolling back");
                self.close_all().await;
                return Err(e);
            }
        }

        info!("All queues ready");
        Ok(())
    }

    async fn start_queue(&self, queue: &QueueInstance) -> Result<()> {
        queue.transition(QueueState::Initializing)?;

        let handle = self
            .backend
            .create_queue(&queue.name, &queue.connection)
            .await?;
        *lock(&queue.queue_handle) = Some(handle.clone());

        let worker = Arc::new(QueueWorker::new(
            queue.name.clone(),
            Arc::clone(&self.registry),
            queue.in_flight.clone(),
        ));
        let consumer = self
            .backend
            .consume(&handle, &queue.connection, worker)
            .await?;
        *lock(&queue.consumer_handle) = Some(consumer);

        queue.transition(QueueState::Ready)?;
        info!(
            queue = %queue.name,
            endpoint = %queue.connection.endpoint(),
            concurrency = queue.connection.concurrency,
            "Queue ready"
        );
        Ok(())
    }

    /// Enqueue a job; returns the backend's message id, never the job outcome
    ///
    /// Target queue = `options.queue_name`, else the configured default.
    ///
    /// # Errors
    /// - AppError::UnknownQueue if the target queue is not configured (nothing is enqueued)
    /// - AppError::QueueNotAccepting before `initialize` or once shutdown started
    /// - AppError::Backend if the backend rejects the enqueue
    pub async fn dispatch(
        &self,
        job_type: impl Into<JobType>,
        payload: JobPayload,
        options: DispatchOptions,
    ) -> Result<MessageId> {
        let job_type = job_type.into();
        let queue_name = options
            .queue_name
            .as_deref()
            .unwrap_or(&self.config.default_queue);

        let queue = self
            .queues
            .get(queue_name)
            .ok_or_else(|| AppError::UnknownQueue(queue_name.to_string()))?;

        let state = queue.state();
        if !state.accepts_dispatch() {
            return Err(AppError::QueueNotAccepting {
                queue: queue.name.clone(),
                state,
            });
        }

        let handle = queue.queue_handle().ok_or_else(|| {
            AppError::InvalidState(format!("queue {} has no backend handle", queue.name))
        })?;

        let message_id = self
            .backend
            .enqueue(&handle, &job_type, payload, &options)
            .await?;

        debug!(
            queue = %queue.name,
            job_type = %job_type,
            message_id = %message_id,
            "Job dispatched"
        );
        Ok(message_id)
    }

    /// Typed dispatch under `J::NAME`
    pub async fn dispatch_job<J: Job>(
        &self,
        payload: &J::Payload,
        options: DispatchOptions,
    ) -> Result<MessageId> {
        let payload = JobPayload::from_serializable(payload)?;
        self.dispatch(J::NAME, payload, options).await
    }

    /// Drain and close every queue
    ///
    /// Stops accepting dispatches, stops consumers and waits until their
    /// in-flight deliveries are settled (bounded by the drain timeout), then
    /// closes backend handles.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let active: Vec<&QueueInstance> = self
            .queues
            .values()
            .filter(|q| q.state() != QueueState::Closed)
            .collect();

        if active.is_empty() {
            return Ok(());
        }

        info!(queues = active.len(), "Shutting down queues");

        for queue in &active {
            if queue.state() == QueueState::Ready {
                queue.transition(QueueState::Draining)?;
            }
        }

        // Closing a consumer waits until its claimed messages are settled
        let deadline = Instant::now() + self.settings.drain_timeout;
        if tokio::time::timeout(self.settings.drain_timeout, self.stop_consumers(&active))
            .await
            .is_err()
        {
            warn!("Drain timeout elapsed before every consumer settled its messages");
        }

        for queue in &active {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !queue.in_flight.wait_idle_timeout(remaining).await {
                warn!(
                    queue = %queue.name,
                    in_flight = queue.in_flight.count(),
                    "Drain timeout elapsed with jobs still in flight"
                );
            }
        }

        self.close_queues(&active).await?;

        info!("Shutdown complete");
        Ok(())
    }

    /// Rollback path for a failed initialize
    async fn close_all(&self) {
        let active: Vec<&QueueInstance> = self
            .queues
            .values()
            .filter(|q| q.state() != QueueState::Closed)
            .collect();

        for queue in &active {
            if queue.state() == QueueState::Ready {
                let _ = queue.transition(QueueState::Draining);
            }
        }
        self.stop_consumers(&active).await;
        if let Err(e) = self.close_queues(&active).await {
            warn!(error = %e, "Rollback left a queue in an unexpected state");
        }
    }

    async fn stop_consumers(&self, queues: &[&QueueInstance]) {
        let closes = queues.iter().filter_map(|queue| {
            let consumer = lock(&queue.consumer_handle).take()?;
            let backend = Arc::clone(&self.backend);
            let name = queue.name.clone();
            Some(async move {
                if let Err(e) = backend.close_consumer(consumer).await {
                    warn!(queue = %name, error = %e, "Failed to close consumer");
                }
            })
        });
        futures::future::join_all(closes).await;
    }

    async fn close_queues(&self, queues: &[&QueueInstance]) -> Result<()> {
        for queue in queues {
            let handle = lock(&queue.queue_handle).take();
            if let Some(handle) = handle {
                if let Err(e) = self.backend.close_queue(handle).await {
                    warn!(queue = %queue.name, error = %e, "Failed to close queue");
                }
            }
            if queue.state() != QueueState::Closed {
                queue.transition(QueueState::Closed)?;
            }
        }
        Ok(())
    }

    pub fn queue_state(&self, name: &str) -> Option<QueueState> {
        self.queues.get(name).map(QueueInstance::state)
    }

    /// Configured queue names, sorted
    pub fn queue_names(&self) -> Vec<&str> {
        self.queues.keys().map(String::as_str).collect()
    }

    pub fn default_queue(&self) -> &str {
        &self.config.default_queue
    }

    pub fn configuration(&self) -> &QueueConfiguration {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Deliveries of `name` currently inside the worker routine
    pub fn in_flight(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|q| q.in_flight.count())
    }
}

#[cfg(test)]
mod tests;
