// SQLite message store: row-level operations behind SqliteQueueBackend

use crate::error::map_sqlx_error;
use jobwire_core::domain::{Delivery, JobPayload, JobType, MessageId};
use jobwire_core::port::{BackendError, TimeProvider};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lifecycle of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Eligible for delivery once `available_at` has passed
    Waiting,
    /// Claimed by a consumer until `locked_until`
    Active,
    Completed,
    /// Could not be turned into a delivery (corrupt row)
    Failed,
    /// Attempt budget exhausted
    Dead,
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageState::Waiting => "WAITING",
            MessageState::Active => "ACTIVE",
            MessageState::Completed => "COMPLETED",
            MessageState::Failed => "FAILED",
            MessageState::Dead => "DEAD",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MessageState {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(MessageState::Waiting),
            "ACTIVE" => Ok(MessageState::Active),
            "COMPLETED" => Ok(MessageState::Completed),
            "FAILED" => Ok(MessageState::Failed),
            "DEAD" => Ok(MessageState::Dead),
            other => Err(BackendError::Storage(format!(
                "unknown message state: {}",
                other
            ))),
        }
    }
}

/// Insert parameters for one message
#[derive(Debug, Clone)]
pub(crate) struct NewMessage {
    pub id: MessageId,
    pub queue: String,
    pub job_type: String,
    pub payload: String,
    pub priority: i32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub delay_ms: u64,
}

/// A row of `queue_messages`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: String,
    pub state: String,
    pub priority: i32,
    pub attempts: i64,
    pub max_attempts: i64,
    pub backoff_ms: i64,
    pub available_at: i64,
    pub locked_until: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

impl StoredMessage {
    pub fn state(&self) -> Result<MessageState, BackendError> {
        self.state.parse()
    }

    /// Build the delivery handed to a consumer
    ///
    /// # Errors
    /// - BackendError::Serialization if the stored payload is not JSON
    pub fn to_delivery(&self) -> Result<Delivery, BackendError> {
        let value: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        Ok(Delivery::new(
            self.id.clone(),
            self.queue.clone(),
            JobType::new(self.job_type.clone()),
            JobPayload::new(value),
            u32::try_from(self.attempts).unwrap_or(u32::MAX),
        ))
    }
}

pub(crate) struct MessageStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl MessageStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// Cheap round trip used as a readiness check
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Returns the raw sqlx error so callers can retry on SQLITE_BUSY
    pub async fn insert(&self, message: &NewMessage) -> Result<(), sqlx::Error> {
        let now = self.now_millis();
        let delay = i64::try_from(message.delay_ms).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO queue_messages (
                id, queue, job_type, payload, state,
                priority, attempts, max_attempts, backoff_ms,
                available_at, locked_until, last_error, created_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, NULL, NULL, ?, NULL)
            "#,
        )
        .bind(&message.id)
        .bind(&message.queue)
        .bind(&message.job_type)
        .bind(&message.payload)
        .bind(MessageState::Waiting.to_string())
        .bind(message.priority)
        .bind(i64::from(message.max_attempts))
        .bind(i64::try_from(message.backoff_ms).unwrap_or(i64::MAX))
        .bind(now.saturating_add(delay))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically claim the next deliverable message of `queue`
    ///
    /// Claims WAITING rows that are due, or ACTIVE rows whose lock expired
    /// (consumer died mid-delivery). Each claim counts as one attempt.
    pub async fn pop_next(
        &self,
        queue: &str,
        visibility_timeout_ms: i64,
    ) -> Result<Option<StoredMessage>, BackendError> {
        let now = self.now_millis();

        let row = sqlx::query_as::<_, StoredMessage>(
            r#"
            UPDATE queue_messages
            SET state = ?, attempts = attempts + 1, locked_until = ?
            WHERE id = (
                SELECT m.id FROM queue_messages m
                WHERE m.queue = ?
                  AND (
                      (m.state = ? AND m.available_at <= ?)
                      OR (m.state = ? AND m.locked_until < ?)
                  )
                ORDER BY m.priority DESC, m.available_at ASC, m.created_at ASC, m.id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(MessageState::Active.to_string())
        .bind(now.saturating_add(visibility_timeout_ms))
        .bind(queue)
        .bind(MessageState::Waiting.to_string())
        .bind(now)
        .bind(MessageState::Active.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row)
    }

    /// Ack
    pub async fn complete(&self, id: &str) -> Result<bool, BackendError> {
        self.finish(id, MessageState::Completed, None).await
    }

    /// Nack with redelivery after `delay_ms`
    pub async fn reschedule(&self, id: &str, delay_ms: u64, error: &str) -> Result<bool, BackendError> {
        let available_at = self
            .now_millis()
            .saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, available_at = ?, locked_until = NULL, last_error = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(MessageState::Waiting.to_string())
        .bind(available_at)
        .bind(error)
        .bind(id)
        .bind(MessageState::Active.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_dead(&self, id: &str, error: &str) -> Result<bool, BackendError> {
        self.finish(id, MessageState::Dead, Some(error)).await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<bool, BackendError> {
        self.finish(id, MessageState::Failed, Some(error)).await
    }

    /// Move an ACTIVE row to a terminal state; `false` if it was no longer ACTIVE
    async fn finish(
        &self,
        id: &str,
        state: MessageState,
        error: Option<&str>,
    ) -> Result<bool, BackendError> {
        let now = self.now_millis();

        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = ?, finished_at = ?, locked_until = NULL,
                last_error = COALESCE(?, last_error)
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(state.to_string())
        .bind(now)
        .bind(error)
        .bind(id)
        .bind(MessageState::Active.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<StoredMessage>, BackendError> {
        sqlx::query_as::<_, StoredMessage>("SELECT * FROM queue_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    pub async fn count_by_state(&self, queue: &str, state: MessageState) -> Result<u64, BackendError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ? AND state = ?",
        )
        .bind(queue)
        .bind(state.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// DEAD rows of `queue`, oldest first
    pub async fn dead_letters(&self, queue: &str) -> Result<Vec<StoredMessage>, BackendError> {
        sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT * FROM queue_messages
            WHERE queue = ? AND state = ?
            ORDER BY finished_at ASC, id ASC
            "#,
        )
        .bind(queue)
        .bind(MessageState::Dead.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }
}
