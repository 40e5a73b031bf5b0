//! Queue Worker
//!
//! This binary claims messages from the durable queue and runs their actors
//! until interrupted. Any number of workers may share one database.

use std::sync::Arc;

use anyhow::{Context, Result};
use queue_core::config::Config;
use queue_core::domains::build_registry;
use queue_core::kernel::jobs::{PostgresQueueStore, WorkerPool};
use queue_core::kernel::ServerDeps;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,queue_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let queue = Arc::new(PostgresQueueStore::new(pool));
    let listener = queue
        .listen()
        .await
        .context("Failed to listen for queue notifications")?;

    let deps = Arc::new(ServerDeps::postgres(queue, &config)?);
    let registry = Arc::new(build_registry());
    let worker_config = config.worker_config();

    tracing::info!(
        worker_id = %worker_config.worker_id,
        concurrency = worker_config.concurrency,
        queues = ?worker_config.queues,
        actors = ?registry.registered_actors(),
        "Starting queue worker"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested, finishing in-flight messages");
            }
            shutdown.cancel();
        });
    }

    WorkerPool::new(registry, deps, worker_config)
        .run(shutdown)
        .await;

    listener.abort();
    tracing::info!("Worker stopped");
    Ok(())
}
