//! Tick records: proof that a schedule already enqueued for a minute.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tokio::sync::Mutex;

use super::ScheduleResult;
use crate::kernel::jobs::{insert_message, EnqueueRequest, MessageId, QueueStore};

#[derive(FromRow, Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleTick {
    pub schedule_id: String,
    pub scheduled_minute: DateTime<Utc>,
    pub message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TickStore: Send + Sync {
    /// Record the tick and enqueue `request` atomically.
    ///
    /// Returns `None` without enqueueing when the tick was already recorded,
    /// whichever scheduler instance recorded it.
    async fn enqueue_once(
        &self,
        schedule_id: &str,
        minute: DateTime<Utc>,
        request: EnqueueRequest,
    ) -> ScheduleResult<Option<MessageId>>;

    async fn ticks(&self, schedule_id: &str) -> ScheduleResult<Vec<ScheduleTick>>;
}

/// Ticks in `schedule_ticks`, written in the same transaction as the message.
#[derive(Clone)]
pub struct PostgresTickStore {
    pool: PgPool,
}

impl PostgresTickStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TickStore for PostgresTickStore {
    async fn enqueue_once(
        &self,
        schedule_id: &str,
        minute: DateTime<Utc>,
        request: EnqueueRequest,
    ) -> ScheduleResult<Option<MessageId>> {
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO schedule_ticks (schedule_id, scheduled_minute)
            VALUES ($1, $2)
            ON CONFLICT (schedule_id, scheduled_minute) DO NOTHING
            RETURNING schedule_id
            "#,
        )
        .bind(schedule_id)
        .bind(minute)
        .fetch_optional(&mut *tx)
        .await?;

        if recorded.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let message_id = insert_message(&mut *tx, &request).await?;

        sqlx::query(
            "UPDATE schedule_ticks SET message_id = $3 WHERE schedule_id = $1 AND scheduled_minute = $2",
        )
        .bind(schedule_id)
        .bind(minute)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message_id)
    }

    async fn ticks(&self, schedule_id: &str) -> ScheduleResult<Vec<ScheduleTick>> {
        let ticks = sqlx::query_as::<_, ScheduleTick>(
            r#"
            SELECT schedule_id, scheduled_minute, message_id, created_at
            FROM schedule_ticks
            WHERE schedule_id = $1
            ORDER BY scheduled_minute
            "#,
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ticks)
    }
}

/// In-memory ticks in front of any queue store.
///
/// The tick map stays locked while enqueueing, which gives the same
/// at-most-once guarantee within one process.
pub struct MemoryTickStore {
    queue: Arc<dyn QueueStore>,
    ticks: Mutex<BTreeMap<(String, DateTime<Utc>), ScheduleTick>>,
}

impl MemoryTickStore {
    pub fn new(queue: Arc<dyn QueueStore>) -> Self {
        Self {
            queue,
            ticks: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl TickStore for MemoryTickStore {
    async fn enqueue_once(
        &self,
        schedule_id: &str,
        minute: DateTime<Utc>,
        request: EnqueueRequest,
    ) -> ScheduleResult<Option<MessageId>> {
        let mut ticks = self.ticks.lock().await;
        let key = (schedule_id.to_string(), minute);
        if ticks.contains_key(&key) {
            return Ok(None);
        }

        let message_id = self.queue.enqueue(request).await?.message_id();
        ticks.insert(
            key,
            ScheduleTick {
                schedule_id: schedule_id.to_string(),
                scheduled_minute: minute,
                message_id: Some(message_id),
                created_at: Utc::now(),
            },
        );
        Ok(Some(message_id))
    }

    async fn ticks(&self, schedule_id: &str) -> ScheduleResult<Vec<ScheduleTick>> {
        Ok(self
            .ticks
            .lock()
            .await
            .values()
            .filter(|t| t.schedule_id == schedule_id)
            .cloned()
            .collect())
    }
}
