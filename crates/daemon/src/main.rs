//! jobwire worker daemon - Main Entry Point
//! Opens the SQLite queue database, starts one consumer per configured queue
//! and drains them on Ctrl+C.

mod config;
mod jobs;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{DaemonConfig, LogFormat};
use jobwire_core::QueueManager;
use jobwire_infra_sqlite::{create_pool, run_migrations, SqliteQueueBackend};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("jobwire=info"))
        .context("Failed to create env filter")?;

    match format {
        LogFormat::Json => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration + logging
    let config = DaemonConfig::from_env()?;
    init_logging(config.log_format)?;

    info!("jobwire worker v{} starting...", VERSION);

    // 2. Database
    if let Some(parent) = config::database_file(&config.database_url)
        .and_then(|path| std::path::Path::new(path).parent())
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }

    info!(database_url = %config.database_url, "Initializing database...");
    let pool = create_pool(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Wiring
    let backend = Arc::new(SqliteQueueBackend::new(pool.clone()));
    let registry = jobs::registry()?;
    info!(job_types = ?registry.job_types(), "Job handlers registered");

    let manager = QueueManager::new(config.queues.clone(), registry, backend)
        .with_settings(config.manager_settings());

    // 4. Start consumers (fatal on failure)
    manager
        .initialize()
        .await
        .context("Queue initialization failed")?;

    info!(queues = ?manager.queue_names(), "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining queues...");

    // 6. Graceful shutdown
    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "Shutdown finished with errors");
    }
    // Checkpoints the WAL before exit
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
