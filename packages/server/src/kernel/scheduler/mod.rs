//! Periodic scheduling of recurring messages.
//!
//! Entries are read once at startup (built-in defaults or a TOML file). Each
//! fires on its cron expression and enqueues at most one message per
//! `(entry id, minute)`, even across scheduler restarts or several scheduler
//! processes.

mod entry;
mod periodic;
mod ticks;

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

use crate::kernel::jobs::QueueError;

pub use entry::{
    default_schedule, load_schedule, normalize_cron, parse_schedule, truncate_to_minute, validate,
    ScheduleEntry,
};
pub use periodic::{LeaderLock, PeriodicScheduler, SCHEDULER_LOCK_KEY};
pub use ticks::{MemoryTickStore, PostgresTickStore, ScheduleTick, TickStore};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("schedule `{id}` has invalid cron expression `{expression}`: {reason}")]
    InvalidCron {
        id: String,
        expression: String,
        reason: String,
    },

    #[error("schedule id `{0}` is used more than once")]
    DuplicateId(String),

    #[error("failed to read schedule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse schedule file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cron scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;
