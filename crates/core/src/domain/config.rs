// Queue Configuration Model
//
// Boundary input shape:
// { "default": "emails",
//   "queues": { "emails": { "connection": { "host", "port", "maxRetriesPerRequest", "enableReadyCheck" } } } }

use crate::domain::error::{DomainError, Result};
use crate::domain::queue::validate_queue_name;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Worker count used when a queue does not configure one
pub const DEFAULT_QUEUE_CONCURRENCY: usize = 1;

fn default_concurrency() -> usize {
    DEFAULT_QUEUE_CONCURRENCY
}

/// Per-queue backend connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    /// `None` = no per-request retry bound
    #[serde(default)]
    pub max_retries_per_request: Option<u32>,
    #[serde(default)]
    pub enable_ready_check: bool,
    /// Parallel deliveries within one queue
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_retries_per_request: None,
            enable_ready_check: false,
            concurrency: DEFAULT_QUEUE_CONCURRENCY,
        }
    }

    pub fn with_max_retries_per_request(mut self, retries: Option<u32>) -> Self {
        self.max_retries_per_request = retries;
        self
    }

    pub fn with_ready_check(mut self, enabled: bool) -> Self {
        self.enable_ready_check = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// `host:port`, used as the endpoint label in logs
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Options for a single configured queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    pub connection: ConnectionParams,
}

impl QueueOptions {
    pub fn new(connection: ConnectionParams) -> Self {
        Self { connection }
    }
}

/// Process-wide queue configuration, read-only after load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfiguration {
    /// Fallback queue for dispatches without an explicit queue name
    #[serde(rename = "default")]
    pub default_queue: String,
    #[serde(deserialize_with = "deserialize_unique_queues")]
    pub queues: BTreeMap<String, QueueOptions>,
}

impl QueueConfiguration {
    pub fn new(default_queue: impl Into<String>) -> Self {
        Self {
            default_queue: default_queue.into(),
            queues: BTreeMap::new(),
        }
    }

    /// Declare a queue; a name may only be declared once
    pub fn with_queue(mut self, name: impl Into<String>, options: QueueOptions) -> Result<Self> {
        let name = name.into();
        if self.queues.contains_key(&name) {
            return Err(DomainError::ValidationError(format!(
                "duplicate queue name: {}",
                name
            )));
        }
        self.queues.insert(name, options);
        Ok(self)
    }

    pub fn from_json(document: &str) -> serde_json::Result<Self> {
        serde_json::from_str(document)
    }

    pub fn queue(&self, name: &str) -> Option<&QueueOptions> {
        self.queues.get(name)
    }

    pub fn contains_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Check structural invariants before any backend is touched
    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(DomainError::ValidationError(
                "configuration declares no queues".to_string(),
            ));
        }
        for (name, options) in &self.queues {
            validate_queue_name(name)?;
            if options.connection.concurrency == 0 {
                return Err(DomainError::ValidationError(format!(
                    "queue {} has zero concurrency",
                    name
                )));
            }
        }
        if self.default_queue.is_empty() {
            return Err(DomainError::ValidationError(
                "default queue is not set".to_string(),
            ));
        }
        if !self.queues.contains_key(&self.default_queue) {
            return Err(DomainError::ValidationError(format!(
                "default queue {} is not declared in queues",
                self.default_queue
            )));
        }
        Ok(())
    }
}

fn deserialize_unique_queues<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, QueueOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueQueues;

    impl<'de> Visitor<'de> for UniqueQueues {
        type Value = BTreeMap<String, QueueOptions>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of queue names to queue options")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut queues = BTreeMap::new();
            while let Some((name, options)) = map.next_entry::<String, QueueOptions>()? {
                if queues.contains_key(&name) {
                    return Err(de::Error::custom(format!("duplicate queue name: {}", name)));
                }
                queues.insert(name, options);
            }
            Ok(queues)
        }
    }

    deserializer.deserialize_map(UniqueQueues)
}
