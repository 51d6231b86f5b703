// jobwire Infrastructure - SQLite Adapter
// Implements: QueueBackend over a durable queue_messages table

mod connection;
mod error;
mod message_store;
mod migration;
mod queue_backend;

pub use connection::create_pool;
pub use message_store::{MessageState, StoredMessage};
pub use migration::run_migrations;
pub use queue_backend::{SqliteBackendSettings, SqliteQueueBackend};
pub use sqlx::SqlitePool;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for BackendError here)
