// In-memory QueueBackend
//
// Process-local channels, no persistence. Redelivery and dead-lettering follow
// RetryPolicy so the dispatcher can be exercised end to end without I/O.

use super::{BackendError, ConsumerHandle, DeliveryHandler, QueueBackend, QueueHandle};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::{
    ConnectionParams, Delivery, DeliveryOutcome, DispatchOptions, JobPayload, JobType, MessageId,
};
use crate::port::id_provider::{IdProvider, UuidProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A message as accepted by `enqueue`
#[derive(Debug, Clone)]
pub struct EnqueuedMessage {
    pub id: MessageId,
    pub queue: String,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub options: DispatchOptions,
}

/// A message whose attempt budget ran out
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
}

struct Envelope {
    delivery: Delivery,
    max_attempts: u32,
    backoff_ms: u64,
}

struct MemoryQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Option<mpsc::UnboundedReceiver<Envelope>>,
    closed: bool,
}

struct Consumer {
    shutdown: ShutdownSender,
    task: JoinHandle<()>,
}

struct Inner {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    consumers: Mutex<HashMap<String, Consumer>>,
    enqueued: Mutex<Vec<EnqueuedMessage>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    available: AtomicBool,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    deliveries: AtomicUsize,
    consumer_seq: AtomicUsize,
    settled: Notify,
    retry_policy: RetryPolicy,
    id_provider: Arc<dyn IdProvider>,
}

/// In-memory backend for tests and single-process deployments
#[derive(Clone)]
pub struct InMemoryQueueBackend {
    inner: Arc<Inner>,
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default(), Arc::new(UuidProvider))
    }

    pub fn with_policy(retry_policy: RetryPolicy, id_provider: Arc<dyn IdProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                consumers: Mutex::new(HashMap::new()),
                enqueued: Mutex::new(Vec::new()),
                dead_letters: Mutex::new(Vec::new()),
                available: AtomicBool::new(true),
                acked: AtomicUsize::new(0),
                nacked: AtomicUsize::new(0),
                deliveries: AtomicUsize::new(0),
                consumer_seq: AtomicUsize::new(0),
                settled: Notify::new(),
                retry_policy,
                id_provider,
            }),
        }
    }

    /// Simulate the backend being (un)reachable
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Every message accepted by `enqueue`, in order
    pub fn enqueued(&self) -> Vec<EnqueuedMessage> {
        lock(&self.inner.enqueued).clone()
    }

    pub fn enqueued_count(&self) -> usize {
        lock(&self.inner.enqueued).len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.inner.dead_letters).clone()
    }

    /// Deliveries handed to consumers (including redeliveries)
    pub fn delivery_count(&self) -> usize {
        self.inner.deliveries.load(Ordering::SeqCst)
    }

    pub fn acked_count(&self) -> usize {
        self.inner.acked.load(Ordering::SeqCst)
    }

    pub fn nacked_count(&self) -> usize {
        self.inner.nacked.load(Ordering::SeqCst)
    }

    pub fn settled_count(&self) -> usize {
        self.acked_count() + self.nacked_count()
    }

    pub fn is_queue_closed(&self, name: &str) -> Option<bool> {
        lock(&self.inner.queues).get(name).map(|q| q.closed)
    }

    pub fn consumer_count(&self) -> usize {
        lock(&self.inner.consumers).len()
    }

    /// Wait until at least `count` deliveries were acked or nacked
    pub async fn wait_for_settled(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.settled.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.settled_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Inner {
    fn settle(
        self: &Arc<Self>,
        envelope: Envelope,
        outcome: DeliveryOutcome,
        tx: mpsc::UnboundedSender<Envelope>,
    ) {
        match outcome {
            DeliveryOutcome::Completed => {
                self.acked.fetch_add(1, Ordering::SeqCst);
            }
            DeliveryOutcome::Failed(reason) => {
                self.nacked.fetch_add(1, Ordering::SeqCst);
                let delivery = &envelope.delivery;
                match self.retry_policy.decide(
                    &delivery.id,
                    delivery.attempt,
                    envelope.max_attempts,
                    envelope.backoff_ms,
                ) {
                    RetryDecision::Retry(delay_ms) => {
                        let mut next = envelope;
                        next.delivery.attempt += 1;
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                            let id = next.delivery.id.clone();
                            if tx.send(next).is_err() {
                                warn!(message_id = %id, "Queue consumer gone, redelivery dropped");
                            }
                        });
                    }
                    RetryDecision::DeadLetter => {
                        info!(
                            queue = %delivery.queue,
                            message_id = %delivery.id,
                            reason = %reason,
                            "Message dead-lettered"
                        );
                        lock(&self.dead_letters).push(DeadLetter {
                            delivery: envelope.delivery,
                            reason,
                        });
                    }
                }
            }
        }
        self.settled.notify_waiters();
    }
}

async fn consume_loop(
    inner: Arc<Inner>,
    queue: String,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    tx: mpsc::UnboundedSender<Envelope>,
    handler: Arc<dyn DeliveryHandler>,
    concurrency: usize,
    mut shutdown: ShutdownToken,
) {
    let slots = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX);
    let permits = Arc::new(Semaphore::new(slots as usize));
    debug!(queue = %queue, concurrency, "In-memory consumer started");

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

        let envelope = tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
            _ = shutdown.wait() => break,
        };

        inner.deliveries.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&inner);
        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = handler.on_message(envelope.delivery.clone()).await;
            inner.settle(envelope, outcome, tx);
            drop(permit);
        });
    }

    // Every delivery holds a permit until it is settled
    let _settled = permits.acquire_many(slots).await;
    debug!(queue = %queue, "In-memory consumer stopped");
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn create_queue(
        &self,
        name: &str,
        _connection: &ConnectionParams,
    ) -> Result<QueueHandle, BackendError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BackendError::QueueUnavailable(name.to_string()));
        }

        let mut queues = lock(&self.inner.queues);
        let reopen = match queues.get(name) {
            Some(existing) => existing.closed,
            None => true,
        };
        if reopen {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(
                name.to_string(),
                MemoryQueue {
                    tx,
                    rx: Some(rx),
                    closed: false,
                },
            );
        }
        Ok(QueueHandle::new(name))
    }

    async fn enqueue(
        &self,
        queue: &QueueHandle,
        job_type: &JobType,
        payload: JobPayload,
        options: &DispatchOptions,
    ) -> Result<MessageId, BackendError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BackendError::QueueUnavailable(queue.name().to_string()));
        }

        let tx = {
            let queues = lock(&self.inner.queues);
            let memory_queue = queues
                .get(queue.name())
                .ok_or_else(|| BackendError::UnknownQueue(queue.name().to_string()))?;
            if memory_queue.closed {
                return Err(BackendError::Closed(queue.name().to_string()));
            }
            memory_queue.tx.clone()
        };

        let id = self.inner.id_provider.generate_id();
        lock(&self.inner.enqueued).push(EnqueuedMessage {
            id: id.clone(),
            queue: queue.name().to_string(),
            job_type: job_type.clone(),
            payload: payload.clone(),
            options: options.clone(),
        });

        let envelope = Envelope {
            delivery: Delivery::new(id.clone(), queue.name(), job_type.clone(), payload, 1),
            max_attempts: self.inner.retry_policy.max_attempts(options),
            backoff_ms: self.inner.retry_policy.backoff_ms(options),
        };

        match options.delay_ms.filter(|d| *d > 0) {
            Some(delay_ms) => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = tx.send(envelope);
                });
            }
            None => {
                tx.send(envelope)
                    .map_err(|_| BackendError::Closed(queue.name().to_string()))?;
            }
        }

        Ok(id)
    }

    async fn consume(
        &self,
        queue: &QueueHandle,
        connection: &ConnectionParams,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, BackendError> {
        let (rx, tx) = {
            let mut queues = lock(&self.inner.queues);
            let memory_queue = queues
                .get_mut(queue.name())
                .ok_or_else(|| BackendError::UnknownQueue(queue.name().to_string()))?;
            let rx = memory_queue
                .rx
                .take()
                .ok_or_else(|| BackendError::AlreadyConsuming(queue.name().to_string()))?;
            (rx, memory_queue.tx.clone())
        };

        let (shutdown, token) = shutdown_channel();
        let task = tokio::spawn(consume_loop(
            Arc::clone(&self.inner),
            queue.name().to_string(),
            rx,
            tx,
            handler,
            connection.concurrency,
            token,
        ));

        let seq = self.inner.consumer_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-consumer-{}", queue.name(), seq);
        lock(&self.inner.consumers).insert(id.clone(), Consumer { shutdown, task });
        Ok(ConsumerHandle::new(id, queue.name()))
    }

    async fn close_consumer(&self, consumer: ConsumerHandle) -> Result<(), BackendError> {
        let running = lock(&self.inner.consumers).remove(consumer.id());
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
        if let Some(memory_queue) = lock(&self.inner.queues).get_mut(queue.name()) {
            memory_queue.closed = true;
        }
        Ok(())
    }
}
