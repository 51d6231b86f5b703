// Worker - per-delivery message-handling routine

pub mod constants;
mod in_flight;
mod panic_guard;
mod shutdown;

pub use in_flight::{InFlightGuard, InFlightTracker};
pub use panic_guard::{execute_guarded, panic_message};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::registry::JobRegistry;
use crate::domain::{Delivery, DeliveryOutcome, JobPayload};
use crate::port::{DeliveryHandler, JobError, JobHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Binds one queue's deliveries to the handlers in the registry
///
/// Stateless per delivery: a handler is resolved fresh every time.
pub struct QueueWorker {
    queue: String,
    registry: Arc<JobRegistry>,
    in_flight: InFlightTracker,
}

impl QueueWorker {
    pub fn new(
        queue: impl Into<String>,
        registry: Arc<JobRegistry>,
        in_flight: InFlightTracker,
    ) -> Self {
        Self {
            queue: queue.into(),
            registry,
            in_flight,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run the lifecycle hooks for one delivery
    ///
    /// 1. resolve handler (unregistered -> Failed, no hooks)
    /// 2. should_send (false -> Completed, error -> Failed, no hooks)
    /// 3. handle -> on_success | on_failure
    pub async fn process(&self, delivery: Delivery) -> DeliveryOutcome {
        let Delivery {
            id,
            job_type,
            payload,
            attempt,
            ..
        } = delivery;

        let handler = match self.registry.resolve(job_type.as_str()) {
            Ok(handler) => handler,
            Err(e) => {
                error!(
                    queue = %self.queue,
                    job_type = %job_type,
                    message_id = %id,
                    error = %e,
                    "Unable to resolve job handler"
                );
                return DeliveryOutcome::Failed(e.to_string());
            }
        };

        let payload = Arc::new(payload);

        let should_send = {
            let handler = Arc::clone(&handler);
            let payload = Arc::clone(&payload);
            execute_guarded(async move { handler.should_send(&payload).await }).await
        };

        match should_send {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    queue = %self.queue,
                    job_type = %job_type,
                    message_id = %id,
                    "should_send returned false, skipping job"
                );
                return DeliveryOutcome::Completed;
            }
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    job_type = %job_type,
                    message_id = %id,
                    error = %e,
                    "should_send failed, aborting delivery"
                );
                return DeliveryOutcome::Failed(format!("should_send failed: {}", e));
            }
        }

        debug!(queue = %self.queue, job_type = %job_type, message_id = %id, attempt, "Handling job");

        let handled = {
            let handler = Arc::clone(&handler);
            let payload = Arc::clone(&payload);
            execute_guarded(async move { handler.handle(&payload).await }).await
        };

        match handled {
            Ok(()) => {
                info!(queue = %self.queue, job_type = %job_type, message_id = %id, "Job completed");
                self.run_on_success(&handler, &payload, &id).await;
                DeliveryOutcome::Completed
            }
            Err(error) => {
                error!(
                    queue = %self.queue,
                    job_type = %job_type,
                    message_id = %id,
                    attempt,
                    error = %error,
                    "Job failed"
                );
                let reason = error.to_string();
                self.run_on_failure(&handler, error, &payload, &id).await;
                DeliveryOutcome::Failed(reason)
            }
        }
    }

    async fn run_on_success(
        &self,
        handler: &Arc<dyn JobHandler>,
        payload: &Arc<JobPayload>,
        message_id: &str,
    ) {
        let handler = Arc::clone(handler);
        let payload = Arc::clone(payload);
        if let Err(e) = execute_guarded(async move { handler.on_success(&payload).await }).await {
            warn!(
                queue = %self.queue,
                message_id = %message_id,
                error = %e,
                "on_success hook failed, ignoring"
            );
        }
    }

    async fn run_on_failure(
        &self,
        handler: &Arc<dyn JobHandler>,
        error: JobError,
        payload: &Arc<JobPayload>,
        message_id: &str,
    ) {
        let handler = Arc::clone(handler);
        let payload = Arc::clone(payload);
        if let Err(e) =
            execute_guarded(async move { handler.on_failure(&error, &payload).await }).await
        {
            warn!(
                queue = %self.queue,
                message_id = %message_id,
                error = %e,
                "on_failure hook failed, ignoring"
            );
        }
    }
}

#[async_trait]
impl DeliveryHandler for QueueWorker {
    async fn on_message(&self, delivery: Delivery) -> DeliveryOutcome {
        let _guard = self.in_flight.enter();
        self.process(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Succeed,
        Skip,
        FailShouldSend,
        FailHandle,
        PanicHandle,
        FailHooks,
    }

    /// Hook invocation log shared across handler instances
    #[derive(Default)]
    struct Calls {
        should_send: AtomicUsize,
        handle: AtomicUsize,
        on_success: AtomicUsize,
        on_failure: AtomicUsize,
        failure_errors: Mutex<Vec<String>>,
        payloads: Mutex<Vec<serde_json::Value>>,
    }

    struct Recording {
        mode: Mode,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl JobHandler for Recording {
        async fn should_send(&self, _payload: &JobPayload) -> Result<bool, JobError> {
            self.calls.should_send.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Skip => Ok(false),
                Mode::FailShouldSend => Err(JobError::failed("predicate broke")),
                _ => Ok(true),
            }
        }

        async fn handle(&self, payload: &JobPayload) -> Result<(), JobError> {
            self.calls.handle.fetch_add(1, Ordering::SeqCst);
            self.calls
                .payloads
                .lock()
                .unwrap()
                .push(payload.as_value().clone());
            match self.mode {
                Mode::FailHandle | Mode::FailHooks => Err(JobError::failed("smtp down")),
                Mode::PanicHandle => panic!("handler exploded"),
                _ => Ok(()),
            }
        }

        async fn on_failure(&self, error: &JobError, _payload: &JobPayload) -> Result<(), JobError> {
            self.calls.on_failure.fetch_add(1, Ordering::SeqCst);
            self.calls
                .failure_errors
                .lock()
                .unwrap()
                .push(error.to_string());
            if self.mode == Mode::FailHooks {
                return Err(JobError::failed("alerting down"));
            }
            Ok(())
        }

        async fn on_success(&self, _payload: &JobPayload) -> Result<(), JobError> {
            self.calls.on_success.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn worker_with(mode: Mode) -> (QueueWorker, Arc<Calls>, InFlightTracker) {
        let calls = Arc::new(Calls::default());
        let mut registry = JobRegistry::new();
        {
            let calls = Arc::clone(&calls);
            registry
                .register("SendWelcomeEmail", move || Recording {
                    mode,
                    calls: Arc::clone(&calls),
                })
                .unwrap();
        }
        let tracker = InFlightTracker::new();
        let worker = QueueWorker::new("emails", Arc::new(registry), tracker.clone());
        (worker, calls, tracker)
    }

    fn delivery(job_type: &str) -> Delivery {
        Delivery::new(
            "msg-1",
            "emails",
            JobType::new(job_type),
            JobPayload::new(json!({"userId": 42})),
            1,
        )
    }

    #[tokio::test]
    async fn test_success_runs_handle_then_on_success() {
        let (worker, calls, _) = worker_with(Mode::Succeed);

        let outcome = worker.process(delivery("SendWelcomeEmail")).await;

        assert_eq!(outcome, DeliveryOutcome::Completed);
        assert_eq!(calls.handle.load(Ordering::SeqCst), 1);
        assert_eq!(calls.on_success.load(Ordering::SeqCst), 1);
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 0);
        assert_eq!(calls.payloads.lock().unwrap()[0], json!({"userId": 42}));
    }

    #[tokio::test]
    async fn test_should_send_false_skips_handle_and_acks() {
        let (worker, calls, _) = worker_with(Mode::Skip);

        let outcome = worker.process(delivery("SendWelcomeEmail")).await;

        assert_eq!(outcome, DeliveryOutcome::Completed);
        assert_eq!(calls.handle.load(Ordering::SeqCst), 0);
        assert_eq!(calls.on_success.load(Ordering::SeqCst), 0);
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_should_send_error_aborts_without_hooks() {
        let (worker, calls, _) = worker_with(Mode::FailShouldSend);

        let outcome = worker.process(delivery("SendWelcomeEmail")).await;

        assert!(matches!(outcome, DeliveryOutcome::Failed(ref r) if r.contains("predicate broke")));
        assert_eq!(calls.handle.load(Ordering::SeqCst), 0);
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_failure_calls_on_failure_once_with_original_error() {
        let (worker, calls, _) = worker_with(Mode::FailHandle);

        let outcome = worker.process(delivery("SendWelcomeEmail")).await;

        assert_eq!(outcome, DeliveryOutcome::Failed("smtp down".to_string()));
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 1);
        assert_eq!(calls.on_success.load(Ordering::SeqCst), 0);
        assert_eq!(*calls.failure_errors.lock().unwrap(), vec!["smtp down"]);
    }

    #[tokio::test]
    async fn test_failing_on_failure_is_swallowed() {
        let (worker, calls, _) = worker_with(Mode::FailHooks);

        let outcome = worker.process(delivery("SendWelcomeEmail")).await;

        // Reported failure is the handler's, not the hook's
        assert_eq!(outcome, DeliveryOutcome::Failed("smtp down".to_string()));
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handle_is_a_handler_failure() {
        let (worker, calls, _) = worker_with(Mode::PanicHandle);

        let outcome = worker.process(delivery("SendWelcomeEmail")).await;

        assert!(matches!(outcome, DeliveryOutcome::Failed(ref r) if r.contains("handler exploded")));
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 1);
        assert_eq!(calls.on_success.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_job_type_runs_no_hooks() {
        let (worker, calls, _) = worker_with(Mode::Succeed);

        let outcome = worker.process(delivery("Unknown")).await;

        assert!(matches!(outcome, DeliveryOutcome::Failed(ref r) if r.contains("Unknown")));
        assert_eq!(calls.should_send.load(Ordering::SeqCst), 0);
        assert_eq!(calls.handle.load(Ordering::SeqCst), 0);
        assert_eq!(calls.on_success.load(Ordering::SeqCst), 0);
        assert_eq!(calls.on_failure.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_on_message_tracks_in_flight() {
        let (worker, _, tracker) = worker_with(Mode::Succeed);

        let outcome = worker.on_message(delivery("SendWelcomeEmail")).await;

        assert!(outcome.is_completed());
        assert_eq!(tracker.count(), 0);
    }
}
