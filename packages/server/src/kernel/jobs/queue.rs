//! Durable queue store contract.
//!
//! Implementations hold every message of every queue and are the only place
//! workers coordinate through: a successful `claim` is the exclusive right to
//! run a message until its lock expires.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::QueueResult;
use super::message::{
    AckOutcome, EnqueueRequest, EnqueueResult, MessageId, NackAction, NackOutcome, QueueMessage,
    QueueStats, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE,
};

/// Metadata for typed actor messages.
///
/// Message structs implement this to name the actor that handles them and to
/// carry the actor's delivery options.
pub trait ActorMessage: Serialize + Send + Sync {
    /// The actor name (used as `actor_name`).
    const ACTOR: &'static str;

    /// Queue the actor consumes from.
    const QUEUE: &'static str = DEFAULT_QUEUE;

    /// Total deliveries allowed before the message is dead-lettered.
    const MAX_ATTEMPTS: i32 = DEFAULT_MAX_ATTEMPTS;

    /// Optional dedupe key.
    ///
    /// If provided, ensures only one message is ever enqueued with this key.
    fn dedupe_key(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a message.
    ///
    /// If the request carries a dedupe key and a message with that key exists,
    /// returns `EnqueueResult::Duplicate` with the existing id.
    async fn enqueue(&self, request: EnqueueRequest) -> QueueResult<EnqueueResult>;

    /// Claim the next eligible message from any of `queues`.
    ///
    /// Consumed messages of those queues whose lock has lapsed are released
    /// first, spending one attempt each. Eligible messages are then claimed in
    /// `(scheduled_for, id)` order. Returns `None` when nothing is eligible,
    /// including when a concurrent claimer won.
    async fn claim(
        &self,
        queues: &[String],
        worker_id: &str,
        lock_duration: Duration,
    ) -> QueueResult<Option<QueueMessage>>;

    /// Mark a message claimed by `worker_id` done.
    ///
    /// Acking a done message is a no-op. Returns `AckOutcome::LockLost` and
    /// changes nothing when `worker_id` no longer holds the claim.
    async fn ack(&self, id: MessageId, worker_id: &str) -> QueueResult<AckOutcome>;

    /// Report a failed delivery by `worker_id`.
    ///
    /// Requeues while the retry budget allows it, otherwise moves the message
    /// to the failed state. Terminal messages are left alone
    /// (`NackOutcome::Ignored`), and so are claims `worker_id` no longer holds
    /// (`NackOutcome::LockLost`).
    async fn nack(
        &self,
        id: MessageId,
        worker_id: &str,
        action: NackAction,
        error: &str,
    ) -> QueueResult<NackOutcome>;

    /// Extend the lock of a running message (heartbeat).
    ///
    /// Returns false when `worker_id` no longer holds the lock.
    async fn extend_lock(
        &self,
        id: MessageId,
        worker_id: &str,
        lock_duration: Duration,
    ) -> QueueResult<bool>;

    async fn get(&self, id: MessageId) -> QueueResult<QueueMessage>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Delete done and failed messages last touched before `before`.
    async fn purge(&self, before: DateTime<Utc>) -> QueueResult<u64>;

    /// Block until new work may be available or `timeout` elapses.
    ///
    /// Wake-ups are hints; callers must still claim. The default simply sleeps.
    async fn wait_for_message(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

/// Typed sending on top of any [`QueueStore`].
#[async_trait]
pub trait QueueStoreExt: QueueStore {
    /// Enqueue a typed message for immediate delivery.
    async fn send<M: ActorMessage>(&self, message: &M) -> QueueResult<EnqueueResult> {
        self.enqueue(build_request(message, None)?).await
    }

    /// Enqueue a typed message that becomes visible after `delay`.
    async fn send_with_delay<M: ActorMessage>(
        &self,
        message: &M,
        delay: Duration,
    ) -> QueueResult<EnqueueResult> {
        self.enqueue(build_request(message, Some(delay))?).await
    }
}

impl<T: QueueStore + ?Sized> QueueStoreExt for T {}

/// Build the enqueue request for a typed message.
pub fn build_request<M: ActorMessage>(
    message: &M,
    delay: Option<Duration>,
) -> QueueResult<EnqueueRequest> {
    Ok(EnqueueRequest {
        actor_name: M::ACTOR.to_string(),
        queue_name: M::QUEUE.to_string(),
        args: serde_json::to_value(message)?,
        delay,
        max_attempts: M::MAX_ATTEMPTS,
        dedupe_key: message.dedupe_key(),
    })
}
