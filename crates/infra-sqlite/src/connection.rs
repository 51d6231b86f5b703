// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use jobwire_core::port::BackendError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Pool size for file databases
const MAX_CONNECTIONS: u32 = 10;

/// Create SQLite connection pool with WAL mode
///
/// `database_url` is a sqlx URL (`sqlite://path/to/queue.db`, `sqlite::memory:`).
/// In-memory databases get one connection that is never recycled: the data
/// lives only as long as that connection, and shared-cache table locks are not
/// covered by the busy timeout.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, BackendError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| BackendError::QueueUnavailable(format!("{}: {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let mut pool_options = SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS);
    if is_in_memory(database_url) {
        pool_options = pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| BackendError::QueueUnavailable(format!("{}: {}", database_url, e)))?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .map_err(map_sqlx_error)?;

    Ok(pool)
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
