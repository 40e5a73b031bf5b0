//! PostgreSQL-backed queue store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a single `UPDATE … RETURNING`,
//! so concurrent workers (in any number of processes) never receive the same
//! message while its lock is held. Lapsed locks are released by the next claim
//! on their queue, and acks or nacks only touch rows the caller still owns.
//! Enqueues publish a `NOTIFY` on
//! [`NOTIFY_CHANNEL`] that idle workers listen for.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{QueueError, QueueResult};
use super::message::{
    resolve_nack, AckOutcome, EnqueueRequest, EnqueueResult, MessageId, MessageState, NackAction,
    NackOutcome, QueueMessage, QueueStats,
};
use super::queue::QueueStore;

pub const NOTIFY_CHANNEL: &str = "queue_messages";

const MESSAGE_COLUMNS: &str = "id, queue_name, actor_name, args, state, enqueued_at, scheduled_for, \
     attempts, max_attempts, lock_owner, lock_expires_at, dedupe_key, last_error, updated_at";

pub struct PostgresQueueStore {
    pool: PgPool,
    notify: Arc<Notify>,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start listening for enqueue notifications.
    ///
    /// Without a listener, `wait_for_message` degrades to plain polling.
    pub async fn listen(&self) -> QueueResult<JoinHandle<()>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        let notify = self.notify.clone();

        Ok(tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        debug!(queue = notification.payload(), "queue notification");
                        notify.notify_waiters();
                    }
                    Err(e) => {
                        warn!(error = %e, "queue listener error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }))
    }

    async fn find_by_dedupe_key(&self, key: &str) -> QueueResult<Option<MessageId>> {
        let id = sqlx::query_scalar::<_, MessageId>(
            "SELECT id FROM queue_messages WHERE dedupe_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn fetch(&self, id: MessageId) -> QueueResult<Option<QueueMessage>> {
        let message = sqlx::query_as::<_, QueueMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM queue_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Release consumed messages of `queues` whose lock has lapsed.
    ///
    /// Each lapse spends one attempt; a message without budget left fails.
    async fn release_lapsed(&self, queues: &[String]) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = CASE
                    WHEN attempts + 1 < max_attempts THEN 'queued'::message_state
                    ELSE 'failed'::message_state
                END,
                attempts = attempts + 1,
                last_error = 'lock held by ' || COALESCE(lock_owner, 'unknown worker') || ' expired',
                lock_owner = NULL,
                lock_expires_at = NULL,
                updated_at = NOW()
            WHERE queue_name = ANY($1)
              AND state = 'consumed'
              AND lock_expires_at < NOW()
            "#,
        )
        .bind(queues)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            warn!(released = result.rows_affected(), "released messages with lapsed locks");
        }
        Ok(result.rows_affected())
    }
}

/// Insert a message inside an existing transaction or connection.
///
/// Returns `None` when the dedupe key is already taken.
pub(crate) async fn insert_message<'e, E>(
    executor: E,
    request: &EnqueueRequest,
) -> QueueResult<Option<MessageId>>
where
    E: sqlx::PgExecutor<'e>,
{
    let delay_ms = request
        .delay
        .map(|d| d.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0);

    let id = sqlx::query_scalar::<_, MessageId>(
        r#"
        WITH inserted AS (
            INSERT INTO queue_messages (
                queue_name, actor_name, args, state, enqueued_at, scheduled_for,
                attempts, max_attempts, dedupe_key, updated_at
            )
            VALUES (
                $1, $2, $3, 'queued', NOW(), NOW() + ($4 || ' milliseconds')::INTERVAL,
                0, GREATEST($5, 1), $6, NOW()
            )
            ON CONFLICT (dedupe_key) WHERE dedupe_key IS NOT NULL DO NOTHING
            RETURNING id, queue_name
        )
        SELECT id FROM inserted, LATERAL (SELECT pg_notify($7, inserted.queue_name)) AS n
        "#,
    )
    .bind(&request.queue_name)
    .bind(&request.actor_name)
    .bind(&request.args)
    .bind(delay_ms.to_string())
    .bind(request.max_attempts)
    .bind(&request.dedupe_key)
    .bind(NOTIFY_CHANNEL)
    .fetch_optional(executor)
    .await?;

    Ok(id)
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<EnqueueResult> {
        if let Some(id) = insert_message(&self.pool, &request).await? {
            return Ok(EnqueueResult::Created(id));
        }

        // The insert only yields no row when the dedupe key already exists
        let key = request.dedupe_key.as_deref().unwrap_or_default();
        match self.find_by_dedupe_key(key).await? {
            Some(existing) => {
                debug!(message_id = %existing, dedupe_key = %key, "found existing message with dedupe key");
                Ok(EnqueueResult::Duplicate(existing))
            }
            None => Err(QueueError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn claim(
        &self,
        queues: &[String],
        worker_id: &str,
        lock_duration: Duration,
    ) -> QueueResult<Option<QueueMessage>> {
        self.release_lapsed(queues).await?;

        let message = sqlx::query_as::<_, QueueMessage>(&format!(
            r#"
            WITH next_message AS (
                SELECT id
                FROM queue_messages
                WHERE queue_name = ANY($1)
                  AND state = 'queued'
                  AND scheduled_for <= NOW()
                ORDER BY scheduled_for, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_messages
            SET
                state = 'consumed',
                lock_owner = $2,
                lock_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_message)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(queues)
        .bind(worker_id)
        .bind(lock_duration.as_millis().to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn ack(&self, id: MessageId, worker_id: &str) -> QueueResult<AckOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = 'done',
                lock_owner = NULL,
                lock_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'consumed' AND lock_owner = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(AckOutcome::Acked);
        }
        match self.fetch(id).await? {
            None => Err(QueueError::NotFound(id)),
            Some(message) if message.state == MessageState::Done => Ok(AckOutcome::Acked),
            Some(_) => Ok(AckOutcome::LockLost),
        }
    }

    async fn nack(
        &self,
        id: MessageId,
        worker_id: &str,
        action: NackAction,
        error: &str,
    ) -> QueueResult<NackOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (MessageState, Option<String>, i32, i32)>(
            r#"
            SELECT state, lock_owner, attempts, max_attempts
            FROM queue_messages
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((state, lock_owner, attempts, max_attempts)) = row else {
            return Err(QueueError::NotFound(id));
        };
        if state.is_terminal() {
            return Ok(NackOutcome::Ignored);
        }
        if state != MessageState::Consumed || lock_owner.as_deref() != Some(worker_id) {
            return Ok(NackOutcome::LockLost);
        }

        let outcome = resolve_nack(attempts, max_attempts, action, Utc::now());
        match outcome {
            NackOutcome::Requeued {
                attempts,
                scheduled_for,
            } => {
                sqlx::query(
                    r#"
                    UPDATE queue_messages
                    SET state = 'queued',
                        attempts = $2,
                        scheduled_for = $3,
                        lock_owner = NULL,
                        lock_expires_at = NULL,
                        last_error = $4,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(attempts)
                .bind(scheduled_for)
                .bind(error)
                .execute(&mut *tx)
                .await?;
            }
            NackOutcome::DeadLettered { attempts } => {
                sqlx::query(
                    r#"
                    UPDATE queue_messages
                    SET state = 'failed',
                        attempts = $2,
                        lock_owner = NULL,
                        lock_expires_at = NULL,
                        last_error = $3,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(attempts)
                .bind(error)
                .execute(&mut *tx)
                .await?;
            }
            NackOutcome::Ignored | NackOutcome::LockLost => {}
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn extend_lock(
        &self,
        id: MessageId,
        worker_id: &str,
        lock_duration: Duration,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET lock_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND state = 'consumed' AND lock_owner = $3
            "#,
        )
        .bind(lock_duration.as_millis().to_string())
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.fetch(id).await?.is_none() {
            return Err(QueueError::NotFound(id));
        }
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: MessageId) -> QueueResult<QueueMessage> {
        self.fetch(id).await?.ok_or(QueueError::NotFound(id))
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let rows = sqlx::query_as::<_, (MessageState, i64)>(
            "SELECT state, COUNT(*) FROM queue_messages GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            match state {
                MessageState::Queued => stats.queued = count,
                MessageState::Consumed => stats.consumed = count,
                MessageState::Failed => stats.failed = count,
                MessageState::Done => stats.done = count,
            }
        }
        Ok(stats)
    }

    async fn purge(&self, before: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE state IN ('done', 'failed') AND updated_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn wait_for_message(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}
