//! QueueManager lifecycle and routing tests, run against the in-memory backend

use super::*;
use crate::domain::{QueueOptions, QueueState};
use crate::application::retry::RetryPolicy;
use crate::port::id_provider::SequentialIdProvider;
use crate::port::queue_backend::mocks::InMemoryQueueBackend;
use crate::port::{BackendError, JobError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_test::{assert_err, assert_ok};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Welcome {
    #[serde(rename = "userId")]
    user_id: u64,
}

#[derive(Default)]
struct Seen {
    handled: AtomicUsize,
    succeeded: AtomicUsize,
    users: std::sync::Mutex<Vec<u64>>,
}

struct SendWelcomeEmail {
    seen: Arc<Seen>,
    delay: Duration,
}

#[async_trait]
impl Job for SendWelcomeEmail {
    const NAME: &'static str = "SendWelcomeEmail";
    type Payload = Welcome;

    async fn handle(&self, payload: &Welcome) -> std::result::Result<(), JobError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.handled.fetch_add(1, Ordering::SeqCst);
        self.seen.users.lock().unwrap().push(payload.user_id);
        Ok(())
    }

    async fn on_success(&self, _payload: &Welcome) -> std::result::Result<(), JobError> {
        self.seen.succeeded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn connection() -> ConnectionParams {
    ConnectionParams::new("localhost", 6379).with_ready_check(true)
}

fn emails_and_sms() -> QueueConfiguration {
    QueueConfiguration::new("emails")
        .with_queue("emails", QueueOptions::new(connection()))
        .unwrap()
        .with_queue("sms", QueueOptions::new(connection()))
        .unwrap()
}

fn registry_with(seen: &Arc<Seen>, delay: Duration) -> JobRegistry {
    let mut registry = JobRegistry::new();
    let seen = Arc::clone(seen);
    registry
        .register_job::<SendWelcomeEmail, _>(move || SendWelcomeEmail {
            seen: Arc::clone(&seen),
            delay,
        })
        .unwrap();
    registry
}

fn backend() -> InMemoryQueueBackend {
    InMemoryQueueBackend::with_policy(
        RetryPolicy::default(),
        Arc::new(SequentialIdProvider::new("msg")),
    )
}

fn manager_with(
    config: QueueConfiguration,
    seen: &Arc<Seen>,
    backend: &InMemoryQueueBackend,
) -> QueueManager {
    QueueManager::new(
        config,
        registry_with(seen, Duration::ZERO),
        Arc::new(backend.clone()),
    )
}

fn welcome(user_id: u64) -> JobPayload {
    JobPayload::new(json!({ "userId": user_id }))
}

#[tokio::test]
async fn test_initialize_moves_every_queue_to_ready() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);

    assert_eq!(manager.queue_state("emails"), Some(QueueState::Uninitialized));
    assert_ok!(manager.initialize().await);

    assert_eq!(manager.queue_names(), vec!["emails", "sms"]);
    assert_eq!(manager.queue_state("emails"), Some(QueueState::Ready));
    assert_eq!(manager.queue_state("sms"), Some(QueueState::Ready));
    assert_eq!(backend.consumer_count(), 2);
}

#[tokio::test]
async fn test_dispatch_without_queue_name_routes_to_default() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();

    let id = assert_ok!(
        manager
            .dispatch("SendWelcomeEmail", welcome(42), DispatchOptions::new())
            .await
    );
    assert_eq!(id, "msg-1");

    let enqueued = backend.enqueued();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].queue, "emails");
    assert_eq!(enqueued[0].job_type, JobType::new("SendWelcomeEmail"));

    assert!(backend.wait_for_settled(1, SETTLE_TIMEOUT).await);
    assert_eq!(seen.handled.load(Ordering::SeqCst), 1);
    assert_eq!(seen.succeeded.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.users.lock().unwrap(), vec![42]);
}

#[tokio::test]
async fn test_dispatch_to_named_queue_is_consumed_only_there() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();

    manager
        .dispatch(
            "SendWelcomeEmail",
            welcome(7),
            DispatchOptions::new().on_queue("sms"),
        )
        .await
        .unwrap();

    assert!(backend.wait_for_settled(1, SETTLE_TIMEOUT).await);
    // Give a second (wrong) consumer a chance to show up
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(backend.enqueued()[0].queue, "sms");
    assert_eq!(backend.delivery_count(), 1);
    assert_eq!(seen.handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dispatch_to_unknown_queue_enqueues_nothing() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();

    let err = assert_err!(
        manager
            .dispatch(
                "SendWelcomeEmail",
                welcome(1),
                DispatchOptions::new().on_queue("push"),
            )
            .await
    );

    assert!(matches!(err, AppError::UnknownQueue(ref name) if name == "push"));
    assert_eq!(err.to_string(), "Queue [push] does not exist");
    assert_eq!(backend.enqueued_count(), 0);
}

#[tokio::test]
async fn test_dispatch_before_initialize_is_rejected() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);

    let err = assert_err!(
        manager
            .dispatch("SendWelcomeEmail", welcome(1), DispatchOptions::new())
            .await
    );

    assert!(matches!(
        err,
        AppError::QueueNotAccepting {
            state: QueueState::Uninitialized,
            ..
        }
    ));
    assert_eq!(backend.enqueued_count(), 0);
}

#[tokio::test]
async fn test_dispatch_of_unregistered_type_is_accepted_then_fails_at_consume() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();

    assert_ok!(
        manager
            .dispatch("NoSuchJob", JobPayload::new(json!({})), DispatchOptions::new())
            .await
    );

    assert!(backend.wait_for_settled(1, SETTLE_TIMEOUT).await);
    assert_eq!(backend.nacked_count(), 1);
    let dead = backend.dead_letters();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("NoSuchJob"));
}

#[tokio::test]
async fn test_typed_dispatch_uses_job_name() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();

    manager
        .dispatch_job::<SendWelcomeEmail>(&Welcome { user_id: 42 }, DispatchOptions::new())
        .await
        .unwrap();

    assert!(backend.wait_for_settled(1, SETTLE_TIMEOUT).await);
    assert_eq!(backend.enqueued()[0].payload.as_value(), &json!({"userId": 42}));
    assert_eq!(*seen.users.lock().unwrap(), vec![42]);
}

#[tokio::test]
async fn test_initialize_twice_is_rejected() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);

    manager.initialize().await.unwrap();
    let err = assert_err!(manager.initialize().await);
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(backend.consumer_count(), 2);
}

#[tokio::test]
async fn test_undeclared_default_queue_is_a_configuration_error() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let config = QueueConfiguration::new("push")
        .with_queue("emails", QueueOptions::new(connection()))
        .unwrap();
    let manager = manager_with(config, &seen, &backend);

    let err = assert_err!(manager.initialize().await);
    assert!(matches!(err, AppError::Configuration(ref msg) if msg.contains("push")));
    assert_eq!(manager.queue_state("emails"), Some(QueueState::Uninitialized));
    assert_eq!(backend.consumer_count(), 0);
}

#[tokio::test]
async fn test_initialize_failure_rolls_back() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    backend.set_available(false);
    let manager = manager_with(emails_and_sms(), &seen, &backend);

    let err = assert_err!(manager.initialize().await);
    assert!(matches!(
        err,
        AppError::Backend(BackendError::QueueUnavailable(_))
    ));

    assert_eq!(manager.queue_state("emails"), Some(QueueState::Closed));
    assert_eq!(manager.queue_state("sms"), Some(QueueState::Closed));
    assert_eq!(backend.consumer_count(), 0);

    let err = assert_err!(
        manager
            .dispatch("SendWelcomeEmail", welcome(1), DispatchOptions::new())
            .await
    );
    assert!(matches!(err, AppError::QueueNotAccepting { .. }));
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_jobs() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = QueueManager::new(
        emails_and_sms(),
        registry_with(&seen, Duration::from_millis(150)),
        Arc::new(backend.clone()),
    );
    manager.initialize().await.unwrap();

    manager
        .dispatch("SendWelcomeEmail", welcome(5), DispatchOptions::new())
        .await
        .unwrap();

    // Wait until the delivery is inside the handler
    let started = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while manager.in_flight("emails") != Some(1) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(started.is_ok());

    assert_ok!(manager.shutdown().await);

    assert_eq!(seen.handled.load(Ordering::SeqCst), 1);
    assert_eq!(backend.acked_count(), 1);
    assert_eq!(manager.in_flight("emails"), Some(0));
    assert_eq!(manager.queue_state("emails"), Some(QueueState::Closed));
    assert_eq!(manager.queue_state("sms"), Some(QueueState::Closed));
    assert_eq!(backend.is_queue_closed("emails"), Some(true));
    assert_eq!(backend.consumer_count(), 0);
}

#[tokio::test]
async fn test_dispatch_after_shutdown_is_rejected() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();
    manager.shutdown().await.unwrap();

    let err = assert_err!(
        manager
            .dispatch("SendWelcomeEmail", welcome(1), DispatchOptions::new())
            .await
    );
    assert!(matches!(
        err,
        AppError::QueueNotAccepting {
            state: QueueState::Closed,
            ..
        }
    ));
    assert_eq!(backend.enqueued_count(), 0);
}

#[tokio::test]
async fn test_shutdown_twice_is_a_noop() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);
    manager.initialize().await.unwrap();

    assert_ok!(manager.shutdown().await);
    assert_ok!(manager.shutdown().await);
    assert_eq!(manager.queue_state("emails"), Some(QueueState::Closed));
}

#[tokio::test]
async fn test_shutdown_before_initialize_closes_queues() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = manager_with(emails_and_sms(), &seen, &backend);

    assert_ok!(manager.shutdown().await);
    assert_eq!(manager.queue_state("emails"), Some(QueueState::Closed));
    assert_err!(manager.initialize().await);
}

#[tokio::test]
async fn test_drain_timeout_does_not_block_shutdown_forever() {
    let seen = Arc::new(Seen::default());
    let backend = backend();
    let manager = QueueManager::new(
        emails_and_sms(),
        registry_with(&seen, Duration::from_secs(5)),
        Arc::new(backend.clone()),
    )
    .with_settings(ManagerSettings {
        drain_timeout: Duration::from_millis(50),
    });
    manager.initialize().await.unwrap();
    manager
        .dispatch("SendWelcomeEmail", welcome(9), DispatchOptions::new())
        .await
        .unwrap();

    let started = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while manager.in_flight("emails") != Some(1) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(started.is_ok());

    let result = tokio::time::timeout(Duration::from_secs(2), manager.shutdown()).await;
    assert!(result.is_ok(), "shutdown should give up after the drain timeout");
    assert_eq!(manager.queue_state("emails"), Some(QueueState::Closed));
}
