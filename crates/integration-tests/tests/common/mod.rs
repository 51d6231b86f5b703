//! Shared fixtures: recording jobs, backend factories and polling helpers

#![allow(dead_code)]

use async_trait::async_trait;
use jobwire_core::domain::{ConnectionParams, QueueOptions};
use jobwire_core::port::id_provider::SequentialIdProvider;
use jobwire_core::port::queue_backend::mocks::InMemoryQueueBackend;
use jobwire_core::port::time_provider::SystemTimeProvider;
use jobwire_core::{
    JobError, JobHandler, JobPayload, JobRegistry, QueueBackend, QueueConfiguration, QueueManager,
};
use jobwire_infra_sqlite::{
    create_pool, run_migrations, MessageState, SqliteBackendSettings, SqliteQueueBackend,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which hook ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    ShouldSend,
    Handle,
    OnSuccess,
    OnFailure,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub job_type: &'static str,
    pub hook: Hook,
    pub payload: serde_json::Value,
    /// The error passed to on_failure
    pub error: Option<String>,
}

/// Hook log shared by every handler instance
#[derive(Default)]
pub struct Probe {
    events: Mutex<Vec<Event>>,
}

impl Probe {
    fn record(
        &self,
        job_type: &'static str,
        hook: Hook,
        payload: &JobPayload,
        error: Option<String>,
    ) {
        self.events.lock().unwrap().push(Event {
            job_type,
            hook,
            payload: payload.as_value().clone(),
            error,
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, job_type: &str, hook: Hook) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_type == job_type && e.hook == hook)
            .count()
    }

    pub fn count_any(&self, job_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_type == job_type)
            .count()
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Skip,
    FailHandle,
    FailHandleAndHooks,
}

struct RecordingJob {
    name: &'static str,
    behavior: Behavior,
    probe: Arc<Probe>,
}

#[async_trait]
impl JobHandler for RecordingJob {
    async fn should_send(&self, payload: &JobPayload) -> Result<bool, JobError> {
        self.probe.record(self.name, Hook::ShouldSend, payload, None);
        Ok(!matches!(self.behavior, Behavior::Skip))
    }

    async fn handle(&self, payload: &JobPayload) -> Result<(), JobError> {
        self.probe.record(self.name, Hook::Handle, payload, None);
        match self.behavior {
            Behavior::FailHandle | Behavior::FailHandleAndHooks => {
                Err(JobError::failed("mail server rejected message"))
            }
            _ => Ok(()),
        }
    }

    async fn on_failure(&self, error: &JobError, payload: &JobPayload) -> Result<(), JobError> {
        self.probe
            .record(self.name, Hook::OnFailure, payload, Some(error.to_string()));
        match self.behavior {
            Behavior::FailHandleAndHooks => Err(JobError::failed("pager unreachable")),
            _ => Ok(()),
        }
    }

    async fn on_success(&self, payload: &JobPayload) -> Result<(), JobError> {
        self.probe.record(self.name, Hook::OnSuccess, payload, None);
        Ok(())
    }
}

/// Registry with one job type per handler behavior
///
/// - `SendWelcomeEmail`: succeeds
/// - `SkippedJob`: should_send returns false
/// - `FailingJob`: handle fails
/// - `FailingHooksJob`: handle and on_failure fail
pub fn recording_registry(probe: &Arc<Probe>) -> JobRegistry {
    let mut registry = JobRegistry::new();
    for (name, behavior) in [
        ("SendWelcomeEmail", Behavior::Succeed),
        ("SkippedJob", Behavior::Skip),
        ("FailingJob", Behavior::FailHandle),
        ("FailingHooksJob", Behavior::FailHandleAndHooks),
    ] {
        let probe = Arc::clone(probe);
        registry
            .register(name, move || RecordingJob {
                name,
                behavior,
                probe: Arc::clone(&probe),
            })
            .unwrap();
    }
    registry
}

/// `{default: "emails", queues: {emails, sms}}`
pub fn emails_and_sms() -> QueueConfiguration {
    let connection = ConnectionParams::new("localhost", 6379).with_ready_check(true);
    QueueConfiguration::new("emails")
        .with_queue("emails", QueueOptions::new(connection.clone()))
        .unwrap()
        .with_queue("sms", QueueOptions::new(connection))
        .unwrap()
}

#[derive(Debug, Clone, Copy)]
pub enum BackendKind {
    Memory,
    Sqlite,
}

/// Backend under test plus its inspection surface
#[derive(Clone)]
pub enum TestBackend {
    Memory(InMemoryQueueBackend),
    Sqlite(Arc<SqliteQueueBackend>),
}

impl TestBackend {
    pub async fn new(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Memory => TestBackend::Memory(InMemoryQueueBackend::new()),
            BackendKind::Sqlite => {
                let pool = create_pool("sqlite::memory:").await.unwrap();
                run_migrations(&pool).await.unwrap();
                TestBackend::Sqlite(Arc::new(sqlite_backend(pool)))
            }
        }
    }

    pub fn as_backend(&self) -> Arc<dyn QueueBackend> {
        match self {
            TestBackend::Memory(backend) => Arc::new(backend.clone()),
            TestBackend::Sqlite(backend) => Arc::clone(backend) as Arc<dyn QueueBackend>,
        }
    }

    /// Messages of `queue` acked so far (in-memory counts all queues)
    pub async fn completed(&self, queue: &str) -> u64 {
        match self {
            TestBackend::Memory(backend) => backend.acked_count() as u64,
            TestBackend::Sqlite(backend) => backend
                .count_by_state(queue, MessageState::Completed)
                .await
                .unwrap(),
        }
    }

    /// Messages of `queue` dead-lettered so far (in-memory counts all queues)
    pub async fn dead(&self, queue: &str) -> u64 {
        match self {
            TestBackend::Memory(backend) => backend.dead_letters().len() as u64,
            TestBackend::Sqlite(backend) => {
                backend.dead_letters(queue).await.unwrap().len() as u64
            }
        }
    }
}

pub fn sqlite_backend(pool: jobwire_infra_sqlite::SqlitePool) -> SqliteQueueBackend {
    SqliteQueueBackend::with_providers(
        pool,
        Arc::new(SystemTimeProvider),
        Arc::new(SequentialIdProvider::new("msg")),
    )
    .with_settings(SqliteBackendSettings {
        idle_sleep: Duration::from_millis(10),
        error_sleep: Duration::from_millis(10),
        visibility_timeout: Duration::from_secs(60),
    })
}

pub async fn started_manager(kind: BackendKind, probe: &Arc<Probe>) -> (QueueManager, TestBackend) {
    let backend = TestBackend::new(kind).await;
    let manager = QueueManager::new(
        emails_and_sms(),
        recording_registry(probe),
        backend.as_backend(),
    );
    manager.initialize().await.unwrap();
    (manager, backend)
}

/// Poll `condition` until it holds or WAIT_TIMEOUT passes
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
