//! Periodic Scheduler
//!
//! This binary enqueues the configured cron entries. Several instances may
//! run; an advisory lock keeps exactly one of them active, and the tick table
//! makes each (entry, minute) enqueue at most once even across a failover.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use queue_core::config::Config;
use queue_core::kernel::scheduler::{
    load_schedule, LeaderLock, PeriodicScheduler, PostgresTickStore, SCHEDULER_LOCK_KEY,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LEADER_RETRY: Duration = Duration::from_secs(10);

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
    let entries = load_schedule(config.schedule_file.as_deref())
        .context("Failed to load schedule")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let scheduler = Arc::new(PeriodicScheduler::new(
        entries,
        Arc::new(PostgresTickStore::new(pool.clone())),
    )?);

    let leader = tokio::select! {
        leader = wait_for_leadership(&pool) => leader?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested before becoming leader");
            return Ok(());
        }
    };

    // Minutes missed while no scheduler was active
    let caught_up = scheduler.tick(Utc::now()).await?;
    if !caught_up.is_empty() {
        tracing::info!(count = caught_up.len(), "Enqueued entries for the current minute");
    }

    let mut jobs = scheduler.clone().start().await?;
    tracing::info!(
        entries = ?scheduler.entries().iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        "Scheduler running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down scheduler");
    jobs.shutdown().await?;
    leader.release().await?;
    Ok(())
}

async fn wait_for_leadership(pool: &sqlx::PgPool) -> Result<LeaderLock> {
    loop {
        if let Some(lock) = LeaderLock::try_acquire(pool, SCHEDULER_LOCK_KEY).await? {
            tracing::info!("Acquired scheduler leadership");
            return Ok(lock);
        }
        tracing::debug!("Another scheduler is active, waiting");
        tokio::time::sleep(LEADER_RETRY).await;
    }
}
