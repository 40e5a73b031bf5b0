//! In-memory queue store.
//!
//! Same semantics as [`PostgresQueueStore`](super::PostgresQueueStore) with a
//! single mutex standing in for row locks. Used by tests and by single-process
//! runs that do not need durability.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use super::error::{QueueError, QueueResult};
use super::message::{
    resolve_nack, to_chrono, AckOutcome, EnqueueRequest, EnqueueResult, MessageId, MessageState, NackAction,
    NackOutcome, QueueMessage, QueueStats,
};
use super::queue::QueueStore;

#[derive(Default)]
struct Inner {
    next_id: i64,
    messages: BTreeMap<MessageId, QueueMessage>,
    dedupe: HashMap<String, MessageId>,
}

#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message, in id order.
    pub async fn messages(&self) -> Vec<QueueMessage> {
        self.inner.lock().await.messages.values().cloned().collect()
    }

    /// Messages addressed to `actor_name`.
    pub async fn messages_for(&self, actor_name: &str) -> Vec<QueueMessage> {
        self.inner
            .lock()
            .await
            .messages
            .values()
            .filter(|m| m.actor_name == actor_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<EnqueueResult> {
        let mut inner = self.inner.lock().await;

        if let Some(key) = &request.dedupe_key {
            if let Some(existing) = inner.dedupe.get(key) {
                return Ok(EnqueueResult::Duplicate(*existing));
            }
        }

        inner.next_id += 1;
        let id = MessageId(inner.next_id);
        let now = Utc::now();
        let message = QueueMessage {
            id,
            scheduled_for: request.scheduled_for(now),
            queue_name: request.queue_name,
            actor_name: request.actor_name,
            args: request.args,
            state: MessageState::Queued,
            enqueued_at: now,
            attempts: 0,
            max_attempts: request.max_attempts.max(1),
            lock_owner: None,
            lock_expires_at: None,
            dedupe_key: request.dedupe_key,
            last_error: None,
            updated_at: now,
        };

        if let Some(key) = &message.dedupe_key {
            inner.dedupe.insert(key.clone(), id);
        }
        inner.messages.insert(id, message);
        drop(inner);

        self.notify.notify_waiters();
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(
        &self,
        queues: &[String],
        worker_id: &str,
        lock_duration: Duration,
    ) -> QueueResult<Option<QueueMessage>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        for message in inner.messages.values_mut() {
            if queues.contains(&message.queue_name) && message.lock_lapsed(now) {
                message.release_lapsed_lock(now);
            }
        }

        let next = inner
            .messages
            .values()
            .filter(|m| queues.contains(&m.queue_name) && m.is_claimable(now))
            .min_by_key(|m| (m.scheduled_for, m.id))
            .map(|m| m.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let message = inner
            .messages
            .get_mut(&id)
            .ok_or(QueueError::NotFound(id))?;
        message.state = MessageState::Consumed;
        message.lock_owner = Some(worker_id.to_string());
        message.lock_expires_at = Some(now + to_chrono(lock_duration));
        message.updated_at = now;

        Ok(Some(message.clone()))
    }

    async fn ack(&self, id: MessageId, worker_id: &str) -> QueueResult<AckOutcome> {
        let mut inner = self.inner.lock().await;
        let message = inner.messages.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if message.state == MessageState::Done {
            return Ok(AckOutcome::Acked);
        }
        if !message.is_held_by(worker_id) {
            return Ok(AckOutcome::LockLost);
        }

        message.state = MessageState::Done;
        message.lock_owner = None;
        message.lock_expires_at = None;
        message.updated_at = Utc::now();
        Ok(AckOutcome::Acked)
    }

    async fn nack(
        &self,
        id: MessageId,
        worker_id: &str,
        action: NackAction,
        error: &str,
    ) -> QueueResult<NackOutcome> {
        let mut inner = self.inner.lock().await;
        let message = inner.messages.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if message.state.is_terminal() {
            return Ok(NackOutcome::Ignored);
        }
        if !message.is_held_by(worker_id) {
            return Ok(NackOutcome::LockLost);
        }

        let now = Utc::now();
        let outcome = resolve_nack(message.attempts, message.max_attempts, action, now);
        match outcome {
            NackOutcome::Requeued {
                attempts,
                scheduled_for,
            } => {
                message.state = MessageState::Queued;
                message.attempts = attempts;
                message.scheduled_for = scheduled_for;
            }
            NackOutcome::DeadLettered { attempts } => {
                message.state = MessageState::Failed;
                message.attempts = attempts;
            }
            NackOutcome::Ignored | NackOutcome::LockLost => {}
        }
        message.lock_owner = None;
        message.lock_expires_at = None;
        message.last_error = Some(error.to_string());
        message.updated_at = now;

        Ok(outcome)
    }

    async fn extend_lock(
        &self,
        id: MessageId,
        worker_id: &str,
        lock_duration: Duration,
    ) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        let message = inner.messages.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if message.state != MessageState::Consumed
            || message.lock_owner.as_deref() != Some(worker_id)
        {
            return Ok(false);
        }

        let now = Utc::now();
        message.lock_expires_at = Some(now + to_chrono(lock_duration));
        message.updated_at = now;
        Ok(true)
    }

    async fn get(&self, id: MessageId) -> QueueResult<QueueMessage> {
        self.inner
            .lock()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for message in inner.messages.values() {
            match message.state {
                MessageState::Queued => stats.queued += 1,
                MessageState::Consumed => stats.consumed += 1,
                MessageState::Failed => stats.failed += 1,
                MessageState::Done => stats.done += 1,
            }
        }
        Ok(stats)
    }

    async fn purge(&self, before: DateTime<Utc>) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;
        let stale: Vec<MessageId> = inner
            .messages
            .values()
            .filter(|m| m.state.is_terminal() && m.updated_at < before)
            .map(|m| m.id)
            .collect();

        for id in &stale {
            let Some(message) = inner.messages.remove(id) else {
                continue;
            };
            // Keys go with their message, as the unique index does in Postgres
            if let Some(key) = message.dedupe_key {
                inner.dedupe.remove(&key);
            }
        }
        Ok(stale.len() as u64)
    }

    async fn wait_for_message(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}
