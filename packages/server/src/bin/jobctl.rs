//! Operator CLI for the job queue
//!
//! Starts workflows and inspects jobs, users and queue depth. Output is JSON
//! so it can be piped into other tools.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use queue_core::config::Config;
use queue_core::domains::system::HealthCheck;
use queue_core::domains::users::{start_workflow, User};
use queue_core::kernel::jobs::{PostgresQueueStore, QueueStore, QueueStoreExt};
use queue_core::kernel::ServerDeps;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "jobctl")]
#[command(about = "Start workflows and inspect the durable job queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Start the users workflow
    Start {
        /// Job id to use (a UUID is generated when omitted)
        #[arg(long)]
        job_id: Option<String>,
    },

    /// Show one job
    Status { job_id: String },

    /// List jobs, newest first
    Jobs {
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// List imported users
    Users {
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Message counts per state
    Stats,

    /// Enqueue a health check message
    Health,

    /// Delete finished messages older than the given age
    Purge {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[derive(Serialize)]
struct UsersPage {
    total: i64,
    offset: i64,
    users: Vec<User>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Errors only; stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let queue = Arc::new(PostgresQueueStore::new(pool.clone()));
    let deps = ServerDeps::postgres(queue.clone(), &config)?;

    match cli.command {
        Commands::Migrate => {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            print_json(&serde_json::json!({ "success": true }))
        }
        Commands::Start { job_id } => {
            let job_id = start_workflow(&deps, job_id).await?;
            print_json(&deps.jobs.get_status(&job_id).await?)
        }
        Commands::Status { job_id } => {
            let job = deps
                .jobs
                .get_status(&job_id)
                .await
                .with_context(|| format!("Failed to load job {job_id}"))?;
            print_json(&job)
        }
        Commands::Jobs { offset, limit } => print_json(&deps.jobs.list_jobs(offset, limit).await?),
        Commands::Users { offset, limit } => {
            let page = UsersPage {
                total: deps.users.count_users().await?,
                offset,
                users: deps.users.list_users(offset, limit).await?,
            };
            print_json(&page)
        }
        Commands::Stats => print_json(&queue.stats().await?),
        Commands::Health => {
            let enqueued = queue.send(&HealthCheck::default()).await?;
            print_json(&serde_json::json!({ "message_id": enqueued.message_id() }))
        }
        Commands::Purge { days } => {
            let cutoff = Utc::now() - Duration::days(days.max(0));
            let purged = queue.purge(cutoff).await?;
            print_json(&serde_json::json!({ "purged": purged }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
