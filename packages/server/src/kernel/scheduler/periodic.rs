//! Periodic scheduler using tokio-cron-scheduler.
//!
//! Each [`ScheduleEntry`] becomes one cron job. A firing does not enqueue
//! directly: it truncates the firing time to the minute and asks the
//! [`TickStore`] to record `(entry id, minute)` and enqueue in one step, so a
//! restarted or duplicated scheduler cannot enqueue the same minute twice.
//!
//! ```text
//! JobScheduler (per entry cron)
//!     │
//!     └─► fire(entry, now)
//!             └─► TickStore.enqueue_once(entry.id, minute, request)
//!                     ├─► tick new      → message enqueued
//!                     └─► tick recorded → skipped
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use super::entry::{truncate_to_minute, validate, ScheduleEntry};
use super::ticks::TickStore;
use super::ScheduleResult;
use crate::kernel::jobs::MessageId;

/// Advisory lock key shared by every scheduler process.
pub const SCHEDULER_LOCK_KEY: i64 = 0x7363_6865_6475_6c65;

pub struct PeriodicScheduler {
    entries: Vec<ScheduleEntry>,
    ticks: Arc<dyn TickStore>,
}

impl PeriodicScheduler {
    pub fn new(entries: Vec<ScheduleEntry>, ticks: Arc<dyn TickStore>) -> ScheduleResult<Self> {
        validate(&entries)?;
        Ok(Self { entries, ticks })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Enqueue `entry` for the minute containing `at`, unless already done.
    pub async fn fire(
        &self,
        entry: &ScheduleEntry,
        at: DateTime<Utc>,
    ) -> ScheduleResult<Option<MessageId>> {
        let minute = truncate_to_minute(at);
        let enqueued = self
            .ticks
            .enqueue_once(&entry.id, minute, entry.request())
            .await?;

        match enqueued {
            Some(message_id) => info!(
                schedule_id = %entry.id,
                actor = %entry.actor_name,
                minute = %minute,
                message_id = %message_id,
                "scheduled message enqueued"
            ),
            None => debug!(
                schedule_id = %entry.id,
                minute = %minute,
                "tick already recorded, skipping"
            ),
        }
        Ok(enqueued)
    }

    /// Fire every entry whose schedule includes the minute of `now`.
    ///
    /// Used on startup to cover a minute whose firing a restart may have
    /// missed; recorded ticks make it harmless when nothing was missed.
    pub async fn tick(&self, now: DateTime<Utc>) -> ScheduleResult<Vec<MessageId>> {
        let mut enqueued = Vec::new();
        for entry in &self.entries {
            if entry.matches_minute(now)? {
                if let Some(id) = self.fire(entry, now).await? {
                    enqueued.push(id);
                }
            }
        }
        Ok(enqueued)
    }

    /// Register every entry with a started `JobScheduler`.
    pub async fn start(self: Arc<Self>) -> ScheduleResult<JobScheduler> {
        let scheduler = JobScheduler::new().await?;

        for entry in &self.entries {
            let expression = entry.normalized_cron()?;
            let this = self.clone();
            let entry = entry.clone();

            let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
                let this = this.clone();
                let entry = entry.clone();
                Box::pin(async move {
                    if let Err(e) = this.fire(&entry, Utc::now()).await {
                        error!(schedule_id = %entry.id, error = %e, "scheduled enqueue failed");
                    }
                })
            })?;

            scheduler.add(job).await?;
        }

        scheduler.start().await?;

        info!(entries = self.entries.len(), "periodic scheduler started");
        Ok(scheduler)
    }
}

/// Session-level advisory lock electing one active scheduler.
///
/// The lock belongs to the pooled connection it was taken on. Hold the guard
/// for the scheduler's lifetime and call [`LeaderLock::release`] on shutdown.
pub struct LeaderLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

impl LeaderLock {
    /// Try once to become leader. `None` when another process holds the lock.
    pub async fn try_acquire(pool: &PgPool, key: i64) -> ScheduleResult<Option<Self>> {
        let mut conn = pool.acquire().await?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        Ok(acquired.then_some(Self { conn, key }))
    }

    pub async fn release(mut self) -> ScheduleResult<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
