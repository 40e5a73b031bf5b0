//! Durable job queue.
//!
//! This module provides the kernel-level infrastructure for background work:
//! - [`QueueStore`] - the durable message store ([`PostgresQueueStore`], [`MemoryQueueStore`])
//! - [`ActorRegistry`] - maps actor names to typed handlers
//! - [`WorkerPool`] - claims messages, runs handlers, acks or nacks
//! - [`RetryPolicy`] - exponential backoff with cap and jitter
//!
//! # Architecture
//!
//! ```text
//! queue.send(&FetchUsers { .. })
//!     │
//!     └─► QueueStore.enqueue()  ──►  queue_messages (state = queued)
//!                                         │
//! WorkerPool                              │ NOTIFY queue_messages
//!     ├─► claim (FOR UPDATE SKIP LOCKED) ◄┘
//!     ├─► ActorRegistry.dispatch()
//!     │       └─► handler(msg, ActorContext) ──► may send the next chain step
//!     └─► ack | nack (RetryPolicy)
//! ```
//!
//! Delivery is at-least-once: a worker that dies mid-message leaves the row
//! consumed until its lock expires. The next claim on that queue puts it back
//! with one more attempt spent (or fails it once the budget is gone). Acks and
//! nacks only apply while the caller still holds the claim.
//! Domain handlers live in their respective domains; this module only provides
//! the infrastructure.

mod error;
mod memory;
mod message;
mod postgres;
mod queue;
mod registry;
mod retry;
mod worker;

pub use error::{ErrorKind, HandlerError, QueueError, QueueResult};
pub use memory::MemoryQueueStore;
pub use message::{
    resolve_nack, AckOutcome, EnqueueRequest, EnqueueResult, MessageId, MessageState, NackAction,
    NackOutcome, QueueMessage, QueueStats, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE,
};
pub(crate) use message::to_chrono;
pub(crate) use postgres::insert_message;
pub use postgres::{PostgresQueueStore, NOTIFY_CHANNEL};
pub use queue::{build_request, ActorMessage, QueueStore, QueueStoreExt};
pub use registry::{ActorContext, ActorRegistry, SharedActorRegistry};
pub use retry::RetryPolicy;
pub use worker::{WorkerConfig, WorkerPool};
