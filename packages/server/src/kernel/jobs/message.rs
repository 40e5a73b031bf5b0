//! Queue message model.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

// ============================================================================
// Identifiers and enums
// ============================================================================

/// Database-assigned message id. Increases with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "message_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    #[default]
    Queued,
    Consumed,
    Failed,
    Done,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Failed | MessageState::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Queued => "queued",
            MessageState::Consumed => "consumed",
            MessageState::Failed => "failed",
            MessageState::Done => "done",
        }
    }
}

// ============================================================================
// QueueMessage
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: MessageId,
    pub queue_name: String,
    pub actor_name: String,
    pub args: serde_json::Value,
    pub state: MessageState,
    pub enqueued_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl QueueMessage {
    /// Whether a consumer may claim this message at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == MessageState::Queued && self.scheduled_for <= now
    }

    /// Whether this message is consumed by a worker whose lock ran out.
    pub fn lock_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.state == MessageState::Consumed && self.lock_expires_at.is_some_and(|at| at < now)
    }

    /// Whether `worker_id` currently holds the claim on this message.
    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.state == MessageState::Consumed && self.lock_owner.as_deref() == Some(worker_id)
    }

    /// Take back a lapsed claim.
    ///
    /// The abandoned delivery counts as an attempt: the message returns to
    /// the queue while budget remains and fails otherwise, so a handler that
    /// keeps killing its worker cannot be redelivered forever.
    pub fn release_lapsed_lock(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.state = if self.attempts < self.max_attempts {
            MessageState::Queued
        } else {
            MessageState::Failed
        };
        self.last_error = Some(lapsed_lock_error(self.lock_owner.as_deref()));
        self.lock_owner = None;
        self.lock_expires_at = None;
        self.updated_at = now;
    }

    /// Whether this claim is the last one the retry budget allows.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }
}

// ============================================================================
// Enqueue
// ============================================================================

/// A message to append to the queue.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct EnqueueRequest {
    pub actor_name: String,

    #[builder(default = DEFAULT_QUEUE.to_string())]
    pub queue_name: String,

    #[builder(default = serde_json::Value::Null)]
    pub args: serde_json::Value,

    /// Visibility delay. The message is invisible to consumers until it elapses.
    #[builder(default, setter(strip_option))]
    pub delay: Option<Duration>,

    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i32,

    /// At most one message ever exists per key; re-enqueueing returns the original.
    #[builder(default, setter(strip_option))]
    pub dedupe_key: Option<String>,
}

impl EnqueueRequest {
    pub fn scheduled_for(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.delay {
            Some(delay) => now + to_chrono(delay),
            None => now,
        }
    }
}

/// Result of an enqueue that honours dedupe keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Message was enqueued, returns new id
    Created(MessageId),
    /// A message with the same dedupe key exists, returns its id
    Duplicate(MessageId),
}

impl EnqueueResult {
    pub fn message_id(&self) -> MessageId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

// ============================================================================
// Nack
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackAction {
    /// Requeue after the delay if the retry budget allows it
    Retry(Duration),
    /// Move straight to the failed state
    DeadLetter,
}

/// Result of acking a claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The message is done (acking a done message is a no-op)
    Acked,
    /// The caller no longer holds the claim; nothing changed
    LockLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued {
        attempts: i32,
        scheduled_for: DateTime<Utc>,
    },
    DeadLettered {
        attempts: i32,
    },
    /// The message was already done or failed
    Ignored,
    /// The caller no longer holds the claim; nothing changed
    LockLost,
}

/// Applies a nack to the counters of a message.
///
/// Shared by every store so the retry budget is enforced identically:
/// attempts always increase, and the message is requeued only while the new
/// count stays below `max_attempts`.
pub fn resolve_nack(
    attempts: i32,
    max_attempts: i32,
    action: NackAction,
    now: DateTime<Utc>,
) -> NackOutcome {
    let attempts = attempts + 1;
    match action {
        NackAction::Retry(delay) if attempts < max_attempts => NackOutcome::Requeued {
            attempts,
            scheduled_for: now + to_chrono(delay),
        },
        _ => NackOutcome::DeadLettered { attempts },
    }
}

fn lapsed_lock_error(owner: Option<&str>) -> String {
    format!("lock held by {} expired", owner.unwrap_or("unknown worker"))
}

/// Message counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub consumed: i64,
    pub failed: i64,
    pub done: i64,
}

/// Converts a std duration, clamping absurd values so timestamp arithmetic cannot overflow.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    let cap = chrono::Duration::days(365 * 100);
    chrono::Duration::from_std(duration).map_or(cap, |d| d.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> QueueMessage {
        let now = Utc::now();
        QueueMessage {
            id: MessageId(1),
            queue_name: DEFAULT_QUEUE.to_string(),
            actor_name: "test_actor".to_string(),
            args: serde_json::Value::Null,
            state: MessageState::Queued,
            enqueued_at: now,
            scheduled_for: now,
            attempts: 0,
            max_attempts: 3,
            lock_owner: None,
            lock_expires_at: None,
            dedupe_key: None,
            last_error: None,
            updated_at: now,
        }
    }

    #[test]
    fn request_defaults() {
        let request = EnqueueRequest::builder().actor_name("noop").build();
        assert_eq!(request.queue_name, DEFAULT_QUEUE);
        assert_eq!(request.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(request.delay.is_none());
        assert!(request.dedupe_key.is_none());
    }

    #[test]
    fn delayed_request_is_scheduled_in_the_future() {
        let now = Utc::now();
        let request = EnqueueRequest::builder()
            .actor_name("noop")
            .delay(Duration::from_secs(30))
            .build();
        assert_eq!(request.scheduled_for(now), now + chrono::Duration::seconds(30));
    }

    #[test]
    fn future_message_is_not_claimable() {
        let mut message = sample_message();
        message.scheduled_for = Utc::now() + chrono::Duration::minutes(5);
        assert!(!message.is_claimable(Utc::now()));
    }

    #[test]
    fn consumed_message_lapses_only_after_lock_expiry() {
        let now = Utc::now();
        let mut message = sample_message();
        message.state = MessageState::Consumed;
        message.lock_owner = Some("w1".to_string());
        message.lock_expires_at = Some(now + chrono::Duration::seconds(10));
        assert!(!message.is_claimable(now));
        assert!(!message.lock_lapsed(now));
        assert!(message.lock_lapsed(now + chrono::Duration::seconds(11)));
        assert!(message.is_held_by("w1"));
        assert!(!message.is_held_by("w2"));
    }

    #[test]
    fn releasing_a_lapsed_lock_spends_an_attempt() {
        let now = Utc::now();
        let mut message = sample_message();
        message.state = MessageState::Consumed;
        message.lock_owner = Some("crashed".to_string());

        message.release_lapsed_lock(now);
        assert_eq!(message.state, MessageState::Queued);
        assert_eq!(message.attempts, 1);
        assert!(message.lock_owner.is_none());
        assert!(message.last_error.as_deref().unwrap().contains("crashed"));
        assert!(message.is_claimable(now));

        message.attempts = 2;
        message.state = MessageState::Consumed;
        message.release_lapsed_lock(now);
        assert_eq!(message.state, MessageState::Failed);
        assert_eq!(message.attempts, 3);
    }

    #[test]
    fn terminal_messages_are_never_claimable() {
        let mut message = sample_message();
        message.state = MessageState::Done;
        assert!(!message.is_claimable(Utc::now()));
        message.state = MessageState::Failed;
        assert!(!message.is_claimable(Utc::now()));
    }

    #[test]
    fn nack_requeues_until_budget_is_spent() {
        let now = Utc::now();
        let retry = NackAction::Retry(Duration::from_secs(2));
        assert_eq!(
            resolve_nack(0, 3, retry, now),
            NackOutcome::Requeued {
                attempts: 1,
                scheduled_for: now + chrono::Duration::seconds(2)
            }
        );
        assert!(matches!(resolve_nack(1, 3, retry, now), NackOutcome::Requeued { attempts: 2, .. }));
        assert_eq!(resolve_nack(2, 3, retry, now), NackOutcome::DeadLettered { attempts: 3 });
    }

    #[test]
    fn dead_letter_ignores_remaining_budget() {
        assert_eq!(
            resolve_nack(0, 10, NackAction::DeadLetter, Utc::now()),
            NackOutcome::DeadLettered { attempts: 1 }
        );
    }

    #[test]
    fn final_attempt_detection() {
        let mut message = sample_message();
        assert!(!message.is_final_attempt());
        message.attempts = 2;
        assert!(message.is_final_attempt());
    }
}
