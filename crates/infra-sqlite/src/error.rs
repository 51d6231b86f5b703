// sqlx::Error -> BackendError
// (orphan rule: From<sqlx::Error> cannot be implemented for a core type here)

use jobwire_core::port::BackendError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => BackendError::Storage(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => BackendError::Storage(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => BackendError::Storage(format!("Database full: {}", db_err.message())),
                    _ => BackendError::Storage(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                BackendError::Storage(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => BackendError::Storage("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            BackendError::Storage(format!("Column not found: {}", col))
        }
        // Connection, pool and I/O failures mean the queue cannot be reached
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendError::QueueUnavailable(err.to_string())
        }
        _ => BackendError::Storage(err.to_string()),
    }
}

/// Transient lock contention (SQLITE_BUSY / SQLITE_LOCKED) worth retrying
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Extended codes keep the primary code in the low byte
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}
