// SQLite QueueBackend Implementation
//
// Polling consumer over the queue_messages table. A message is claimed by an
// atomic UPDATE ... RETURNING, stays ACTIVE while the handler runs, and is
// settled to COMPLETED / WAITING (backoff) / DEAD by the delivery outcome.

use crate::error::{is_busy, map_sqlx_error};
use crate::message_store::{MessageState, MessageStore, NewMessage, StoredMessage};
use async_trait::async_trait;
use jobwire_core::application::retry::{RetryDecision, RetryPolicy};
use jobwire_core::application::worker::constants::{
    DEFAULT_VISIBILITY_TIMEOUT_MS, ERROR_RECOVERY_SLEEP_DURATION, IDLE_SLEEP_DURATION,
};
use jobwire_core::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken};
use jobwire_core::domain::{
    ConnectionParams, DeliveryOutcome, DispatchOptions, JobPayload, JobType, MessageId,
};
use jobwire_core::port::id_provider::{IdProvider, UuidProvider};
use jobwire_core::port::time_provider::{SystemTimeProvider, TimeProvider};
use jobwire_core::port::{BackendError, ConsumerHandle, DeliveryHandler, QueueBackend, QueueHandle};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Pause between retries of a busy write
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polling and locking knobs
#[derive(Debug, Clone)]
pub struct SqliteBackendSettings {
    /// Sleep after an empty poll
    pub idle_sleep: Duration,
    /// Sleep after a storage error in the consumer loop
    pub error_sleep: Duration,
    /// How long a claimed message stays invisible to other consumers
    pub visibility_timeout: Duration,
}

impl Default for SqliteBackendSettings {
    fn default() -> Self {
        Self {
            idle_sleep: IDLE_SLEEP_DURATION,
            error_sleep: ERROR_RECOVERY_SLEEP_DURATION,
            visibility_timeout: Duration::from_millis(DEFAULT_VISIBILITY_TIMEOUT_MS as u64),
        }
    }
}

struct QueueSlot {
    connection: ConnectionParams,
    closed: bool,
}

struct RunningConsumer {
    queue: String,
    shutdown: ShutdownSender,
    task: JoinHandle<()>,
}

struct Shared {
    store: MessageStore,
    retry_policy: RetryPolicy,
    settings: SqliteBackendSettings,
}

/// Durable queue backend on a single SQLite database
pub struct SqliteQueueBackend {
    shared: Arc<Shared>,
    id_provider: Arc<dyn IdProvider>,
    queues: Mutex<HashMap<String, QueueSlot>>,
    consumers: Mutex<HashMap<String, RunningConsumer>>,
    consumer_seq: AtomicUsize,
}

impl SqliteQueueBackend {
    /// Backend with system clock, UUID message ids and default retry policy
    ///
    /// The pool must already be migrated (see `run_migrations`).
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_providers(pool, Arc::new(SystemTimeProvider), Arc::new(UuidProvider))
    }

    pub fn with_providers(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: MessageStore::new(pool, time_provider),
                retry_policy: RetryPolicy::default(),
                settings: SqliteBackendSettings::default(),
            }),
            id_provider,
            queues: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            consumer_seq: AtomicUsize::new(0),
        }
    }

    /// Must be called before any consumer is started
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.update_shared(|shared| shared.retry_policy = retry_policy);
        self
    }

    /// Must be called before any consumer is started
    pub fn with_settings(mut self, settings: SqliteBackendSettings) -> Self {
        self.update_shared(|shared| shared.settings = settings);
        self
    }

    fn update_shared(&mut self, apply: impl FnOnce(&mut Shared)) {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            apply(shared);
        } else {
            warn!("SQLite backend already shared, settings change ignored");
        }
    }

    /// Number of messages of `queue` in `state`
    pub async fn count_by_state(
        &self,
        queue: &str,
        state: MessageState,
    ) -> Result<u64, BackendError> {
        self.shared.store.count_by_state(queue, state).await
    }

    /// Messages of `queue` whose attempt budget ran out
    pub async fn dead_letters(&self, queue: &str) -> Result<Vec<StoredMessage>, BackendError> {
        self.shared.store.dead_letters(queue).await
    }

    pub async fn find_message(&self, id: &str) -> Result<Option<StoredMessage>, BackendError> {
        self.shared.store.find_by_id(id).await
    }

    fn open_slot(&self, queue: &QueueHandle) -> Result<ConnectionParams, BackendError> {
        let queues = lock(&self.queues);
        let slot = queues
            .get(queue.name())
            .ok_or_else(|| BackendError::UnknownQueue(queue.name().to_string()))?;
        if slot.closed {
            return Err(BackendError::Closed(queue.name().to_string()));
        }
        Ok(slot.connection.clone())
    }

    /// Run `insert`, retrying SQLITE_BUSY up to `max_retries` times
    async fn insert_with_retry(
        &self,
        message: &NewMessage,
        max_retries: Option<u32>,
    ) -> Result<(), BackendError> {
        let mut retries = 0u32;
        loop {
            match self.shared.store.insert(message).await {
                Ok(()) => return Ok(()),
                Err(e) if is_busy(&e) && max_retries.is_some_and(|max| retries < max) => {
                    retries += 1;
                    debug!(
                        queue = %message.queue,
                        message_id = %message.id,
                        retries,
                        "Database busy, retrying enqueue"
                    );
                    sleep(BUSY_RETRY_DELAY * retries).await;
                }
                Err(e) => return Err(map_sqlx_error(e)),
            }
        }
    }
}

impl Shared {
    /// Settle one delivery; storage errors are logged, the row is then
    /// picked up again once its lock expires
    async fn settle(&self, message: &StoredMessage, attempt: u32, outcome: DeliveryOutcome) {
        let result = match outcome {
            DeliveryOutcome::Completed => self.store.complete(&message.id).await,
            DeliveryOutcome::Failed(reason) => {
                let max_attempts = u32::try_from(message.max_attempts).unwrap_or(1);
                let backoff_ms = u64::try_from(message.backoff_ms).unwrap_or(0);
                match self
                    .retry_policy
                    .decide(&message.id, attempt, max_attempts, backoff_ms)
                {
                    RetryDecision::Retry(delay_ms) => {
                        self.store.reschedule(&message.id, delay_ms, &reason).await
                    }
                    RetryDecision::DeadLetter => {
                        info!(
                            queue = %message.queue,
                            message_id = %message.id,
                            reason = %reason,
                            "Message dead-lettered"
                        );
                        self.store.mark_dead(&message.id, &reason).await
                    }
                }
            }
        };

        match result {
            Ok(true) => {}
            Ok(false) => warn!(
                queue = %message.queue,
                message_id = %message.id,
                "Message no longer ACTIVE when settling (lock expired?)"
            ),
            Err(e) => error!(
                queue = %message.queue,
                message_id = %message.id,
                error = %e,
                "Failed to settle message"
            ),
        }
    }

    async fn deliver(&self, message: StoredMessage, handler: Arc<dyn DeliveryHandler>) {
        let delivery = match message.to_delivery() {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(
                    queue = %message.queue,
                    message_id = %message.id,
                    error = %e,
                    "Undeliverable message, marking FAILED"
                );
                if let Err(e) = self.store.mark_failed(&message.id, &e.to_string()).await {
                    error!(message_id = %message.id, error = %e, "Failed to mark message FAILED");
                }
                return;
            }
        };

        let attempt = delivery.attempt;
        debug!(
            queue = %message.queue,
            message_id = %message.id,
            attempt,
            "Delivering message"
        );
        let outcome = handler.on_message(delivery).await;
        self.settle(&message, attempt, outcome).await;
    }
}

async fn consume_loop(
    shared: Arc<Shared>,
    queue: String,
    handler: Arc<dyn DeliveryHandler>,
    concurrency: usize,
    mut shutdown: ShutdownToken,
) {
    let slots = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX);
    let permits = Arc::new(Semaphore::new(slots as usize));
    let visibility_timeout_ms =
        i64::try_from(shared.settings.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
    info!(queue = %queue, concurrency, "SQLite consumer started");

    loop {
        if shutdown.is_shutdown() {
            break;
        }

        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.wait() => break,
        };

        match shared.store.pop_next(&queue, visibility_timeout_ms).await {
            Ok(Some(message)) => {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    shared.deliver(message, handler).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = sleep(shared.settings.idle_sleep) => {},
                    _ = shutdown.wait() => break,
                }
            }
            Err(e) => {
                drop(permit);
                error!(queue = %queue, error = %e, "Failed to poll queue");
                tokio::select! {
                    _ = sleep(shared.settings.error_sleep) => {},
                    _ = shutdown.wait() => break,
                }
            }
        }
    }

    // Every delivery holds a permit until it is settled
    let _settled = permits.acquire_many(slots).await;
    info!(queue = %queue, "SQLite consumer stopped");
}

#[async_trait]
impl QueueBackend for SqliteQueueBackend {
    async fn create_queue(
        &self,
        name: &str,
        connection: &ConnectionParams,
    ) -> Result<QueueHandle, BackendError> {
        if connection.enable_ready_check {
            self.shared.store.ping().await.map_err(|e| {
                BackendError::QueueUnavailable(format!("{} ({}): {}", name, connection.endpoint(), e))
            })?;
        }

        lock(&self.queues).insert(
            name.to_string(),
            QueueSlot {
                connection: connection.clone(),
                closed: false,
            },
        );

        debug!(queue = %name, endpoint = %connection.endpoint(), "SQLite queue opened");
        Ok(QueueHandle::new(name))
    }

    async fn enqueue(
        &self,
        queue: &QueueHandle,
        job_type: &JobType,
        payload: JobPayload,
        options: &DispatchOptions,
    ) -> Result<MessageId, BackendError> {
        let connection = self.open_slot(queue)?;

        let payload = serde_json::to_string(payload.as_value())
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let message = NewMessage {
            id: self.id_provider.generate_id(),
            queue: queue.name().to_string(),
            job_type: job_type.to_string(),
            payload,
            priority: options.priority.unwrap_or(0),
            max_attempts: self.shared.retry_policy.max_attempts(options),
            backoff_ms: self.shared.retry_policy.backoff_ms(options),
            delay_ms: options.delay_ms.unwrap_or(0),
        };

        self.insert_with_retry(&message, connection.max_retries_per_request)
            .await?;

        debug!(
            queue = %message.queue,
            job_type = %message.job_type,
            message_id = %message.id,
            "Message stored"
        );
        Ok(message.id)
    }

    async fn consume(
        &self,
        queue: &QueueHandle,
        connection: &ConnectionParams,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, BackendError> {
        self.open_slot(queue)?;

        let mut consumers = lock(&self.consumers);
        if consumers.values().any(|c| !c.task.is_finished() && c.queue == queue.name()) {
            return Err(BackendError::AlreadyConsuming(queue.name().to_string()));
        }

        let (shutdown, token) = shutdown_channel();
        let task = tokio::spawn(consume_loop(
            Arc::clone(&self.shared),
            queue.name().to_string(),
            handler,
            connection.concurrency,
            token,
        ));

        let seq = self.consumer_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-consumer-{}", queue.name(), seq);
        consumers.insert(
            id.clone(),
            RunningConsumer {
                queue: queue.name().to_string(),
                shutdown,
                task,
            },
        );
        Ok(ConsumerHandle::new(id, queue.name()))
    }

    /// Stops polling and returns once every claimed message is settled
    async fn close_consumer(&self, consumer: ConsumerHandle) -> Result<(), BackendError> {
        let running = lock(&self.consumers).remove(consumer.id());
        let Some(running) = running else {
            return Ok(());
        };

        running.shutdown.shutdown();
        running
            .task
            .await
            .map_err(|e| BackendError::Storage(format!("consumer task failed: {}", e)))
    }

    async fn close_queue(&self, queue: QueueHandle) -> Result<(), BackendError> {
        if let Some(slot) = lock(&self.queues).get_mut(queue.name()) {
            slot.closed = true;
        }
        debug!(queue = %queue.name(), "SQLite queue closed");
        Ok(())
    }
}
