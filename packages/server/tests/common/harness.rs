//! Test harness with testcontainers for integration testing.
//!
//! Uses one shared Postgres container per test binary. The container and
//! migrations are initialized on first use, then reused. Tests isolate
//! themselves with unique queue names, job ids and schedule ids.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use queue_core::kernel::jobs::PostgresQueueStore;
use queue_core::kernel::tracker::PostgresJobTracker;

/// Shared test infrastructure that persists across all tests of a binary.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// `None` once initialization has failed (e.g. no Docker daemon).
static SHARED_INFRA: OnceCell<Option<SharedTestInfra>> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> Option<&'static Self> {
        SHARED_INFRA
            .get_or_init(|| async {
                match Self::init().await {
                    Ok(infra) => Some(infra),
                    Err(e) => {
                        eprintln!("skipping Postgres tests: {e:#}");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }
}

/// Test harness giving each test a fresh pool on the shared database.
///
/// ```ignore
/// let Some(ctx) = TestHarness::try_new().await else { return };
/// let store = ctx.queue();
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
}

impl TestHarness {
    /// `None` when no container runtime is available; callers return early.
    pub async fn try_new() -> Option<Self> {
        let infra = SharedTestInfra::get().await?;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .expect("Failed to connect to test database");

        Some(Self { db_pool })
    }

    pub fn queue(&self) -> Arc<PostgresQueueStore> {
        Arc::new(PostgresQueueStore::new(self.db_pool.clone()))
    }

    pub fn tracker(&self) -> Arc<PostgresJobTracker> {
        Arc::new(PostgresJobTracker::new(self.db_pool.clone()))
    }
}
