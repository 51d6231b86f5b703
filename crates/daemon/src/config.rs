// Daemon configuration, read from the environment

use anyhow::{Context, Result};
use jobwire_core::domain::{ConnectionParams, QueueConfiguration, QueueOptions};
use jobwire_core::ManagerSettings;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.jobwire/queue.db";
pub const DEFAULT_QUEUE: &str = "default";
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

const ENV_QUEUE_CONFIG: &str = "JOBWIRE_QUEUE_CONFIG";
const ENV_DB_PATH: &str = "JOBWIRE_DB_PATH";
const ENV_DRAIN_TIMEOUT_SECS: &str = "JOBWIRE_DRAIN_TIMEOUT_SECS";
const ENV_LOG_FORMAT: &str = "JOBWIRE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub queues: QueueConfiguration,
    /// sqlx database URL
    pub database_url: String,
    pub drain_timeout: Duration,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let queues = match lookup(ENV_QUEUE_CONFIG) {
            Some(document) => QueueConfiguration::from_json(&document)
                .with_context(|| format!("{} is not a valid queue configuration", ENV_QUEUE_CONFIG))?,
            None => default_queues()?,
        };

        let db_path = lookup(ENV_DB_PATH)
            .unwrap_or_else(|| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

        let drain_timeout = match lookup(ENV_DRAIN_TIMEOUT_SECS) {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("{} must be a number of seconds", ENV_DRAIN_TIMEOUT_SECS))?,
            ),
            None => Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        };

        let log_format = match lookup(ENV_LOG_FORMAT).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            queues,
            database_url: database_url(&db_path),
            drain_timeout,
            log_format,
        })
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            drain_timeout: self.drain_timeout,
        }
    }
}

/// One `default` queue on localhost:6379
fn default_queues() -> Result<QueueConfiguration> {
    let connection = ConnectionParams::new("localhost", 6379).with_ready_check(true);
    Ok(QueueConfiguration::new(DEFAULT_QUEUE)
        .with_queue(DEFAULT_QUEUE, QueueOptions::new(connection))?)
}

fn database_url(db_path: &str) -> String {
    if db_path.starts_with("sqlite:") {
        db_path.to_string()
    } else {
        format!("sqlite://{}", db_path)
    }
}

/// Filesystem path behind a `sqlite://` URL, if it is a file database
pub fn database_file(database_url: &str) -> Option<&str> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next()?;
    (!path.is_empty() && !path.contains(":memory:")).then_some(path)
}
