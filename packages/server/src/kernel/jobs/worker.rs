//! Worker pool for processing queue messages.
//!
//! The `WorkerPool` is a long-running service that:
//! - Claims ready messages from the [`QueueStore`]
//! - Dispatches them to actors through the [`ActorRegistry`]
//! - Extends the message lock while a handler runs (heartbeat)
//! - Acks on success, nacks per the [`RetryPolicy`] on failure
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//!     │
//!     ├─► worker loop × concurrency
//!     │       ├─► claim (SKIP LOCKED) or wait for NOTIFY / poll interval
//!     │       ├─► ActorRegistry.dispatch(message)  ◄── heartbeat task
//!     │       └─► ack | nack(Retry(backoff) | DeadLetter)
//!     └─► CancellationToken: stop claiming, finish in-flight messages
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::error::{HandlerError, QueueResult};
use super::message::{AckOutcome, NackOutcome, QueueMessage, DEFAULT_QUEUE};
use super::queue::QueueStore;
use super::registry::SharedActorRegistry;
use super::retry::RetryPolicy;
use crate::kernel::ServerDeps;

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct WorkerConfig {
    /// Number of concurrent worker loops in this process
    #[builder(default = 4)]
    pub concurrency: usize,

    /// Queues consumed by every loop
    #[builder(default = vec![DEFAULT_QUEUE.to_string()])]
    pub queues: Vec<String>,

    /// Upper bound on the idle wait between claims
    #[builder(default = Duration::from_secs(1))]
    pub poll_interval: Duration,

    /// How long a claim stays exclusive without a heartbeat
    #[builder(default = Duration::from_secs(60))]
    pub lock_duration: Duration,

    #[builder(default = Duration::from_secs(20))]
    pub heartbeat_interval: Duration,

    /// Prefix of the lock owner recorded on claimed messages
    #[builder(default = format!("worker-{}", Uuid::new_v4()))]
    pub worker_id: String,

    #[builder(default)]
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<dyn QueueStore>,
    registry: SharedActorRegistry,
    deps: Arc<ServerDeps>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(registry: SharedActorRegistry, deps: Arc<ServerDeps>, config: WorkerConfig) -> Self {
        Self {
            store: deps.queue.clone(),
            registry,
            deps,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run every worker loop until `shutdown` is cancelled.
    ///
    /// Returns once all loops have stopped and their in-flight messages are
    /// acked or nacked.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            actors = ?self.registry.registered_actors(),
            "worker pool starting"
        );

        let loops = (0..self.config.concurrency.max(1)).map(|index| {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            let owner = format!("{}-{}", self.config.worker_id, index);
            tokio::spawn(async move { pool.worker_loop(owner, shutdown).await })
        });

        for result in join_all(loops).await {
            if let Err(e) = result {
                error!(error = %e, "worker loop panicked");
            }
        }

        info!(worker_id = %self.config.worker_id, "worker pool stopped");
    }

    async fn worker_loop(&self, owner: String, shutdown: CancellationToken) {
        debug!(owner = %owner, "worker loop started");

        while !shutdown.is_cancelled() {
            match self.run_once(&owner).await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.store.wait_for_message(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(owner = %owner, error = %e, "failed to claim message");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        debug!(owner = %owner, "worker loop stopped");
    }

    /// Claim and process at most one message as `owner`.
    ///
    /// Returns false when nothing was eligible.
    pub async fn run_once(&self, owner: &str) -> QueueResult<bool> {
        let claimed = self
            .store
            .claim(&self.config.queues, owner, self.config.lock_duration)
            .await?;

        match claimed {
            Some(message) => {
                self.process(message, owner).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Process messages until none is eligible. Returns how many ran.
    pub async fn drain(&self) -> QueueResult<usize> {
        let owner = format!("{}-drain", self.config.worker_id);
        let mut processed = 0;
        while self.run_once(&owner).await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn process(&self, message: QueueMessage, owner: &str) {
        debug!(
            message_id = %message.id,
            actor = %message.actor_name,
            attempts = message.attempts,
            "processing message"
        );

        let (result, lock_lost) = self.execute_with_heartbeat(&message, owner).await;

        // Another worker may own the message now; its outcome is theirs to report
        if lock_lost {
            warn!(
                message_id = %message.id,
                actor = %message.actor_name,
                owner = %owner,
                succeeded = result.is_ok(),
                "lock lost while handler ran, leaving message to its new owner"
            );
            return;
        }

        match result {
            Ok(()) => {
                debug!(message_id = %message.id, actor = %message.actor_name, "message succeeded");
                match self.store.ack(message.id, owner).await {
                    Ok(AckOutcome::Acked) => {}
                    Ok(AckOutcome::LockLost) => {
                        warn!(message_id = %message.id, owner = %owner, "ack skipped, lock no longer held");
                    }
                    Err(e) => error!(message_id = %message.id, error = %e, "failed to ack message"),
                }
            }
            Err(err) => self.fail(&message, owner, err).await,
        }
    }

    async fn fail(&self, message: &QueueMessage, owner: &str, err: HandlerError) {
        let action = self.config.retry.decide(message.attempts, err.kind());
        let error_msg = err.to_string();

        match self.store.nack(message.id, owner, action, &error_msg).await {
            Ok(NackOutcome::Requeued {
                attempts,
                scheduled_for,
            }) => {
                warn!(
                    message_id = %message.id,
                    actor = %message.actor_name,
                    attempts,
                    retry_at = %scheduled_for,
                    error = %error_msg,
                    "message failed, will retry"
                );
            }
            Ok(NackOutcome::DeadLettered { attempts }) => {
                error!(
                    message_id = %message.id,
                    actor = %message.actor_name,
                    attempts,
                    error = %error_msg,
                    "message failed permanently"
                );
            }
            Ok(NackOutcome::Ignored) => {
                debug!(message_id = %message.id, "nack ignored, message already terminal");
            }
            Ok(NackOutcome::LockLost) => {
                warn!(message_id = %message.id, owner = %owner, "nack skipped, lock no longer held");
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "failed to nack message");
            }
        }
    }

    /// Run the handler while a side task keeps extending the lock.
    ///
    /// The flag reports whether a heartbeat found the claim taken over.
    async fn execute_with_heartbeat(
        &self,
        message: &QueueMessage,
        owner: &str,
    ) -> (Result<(), HandlerError>, bool) {
        let cancel = CancellationToken::new();
        let heartbeat = {
            let store = self.store.clone();
            let cancel = cancel.clone();
            let id = message.id;
            let owner = owner.to_string();
            let lock_duration = self.config.lock_duration;
            let heartbeat_interval = self.config.heartbeat_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(heartbeat_interval);
                interval.tick().await; // Skip first immediate tick

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = interval.tick() => {
                            match store.extend_lock(id, &owner, lock_duration).await {
                                Ok(true) => debug!(message_id = %id, "lock extended"),
                                Ok(false) => {
                                    warn!(message_id = %id, owner = %owner, "lock no longer held");
                                    return true;
                                }
                                Err(e) => warn!(message_id = %id, error = %e, "heartbeat failed"),
                            }
                        }
                    }
                }
            })
        };

        let result = self.registry.dispatch(message, self.deps.clone()).await;

        cancel.cancel();
        let lock_lost = heartbeat.await.unwrap_or(false);

        (result, lock_lost)
    }
}
