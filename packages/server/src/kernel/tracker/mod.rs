//! Job status tracking for chained workflows.
//!
//! A job record is keyed by a caller-visible `job_id` and lives independently
//! of the queue messages that carry the workflow. Each chain step merges its
//! contribution into `result`; the last step (or the first irrecoverable
//! failure) moves the job to a terminal status.
//!
//! Writes never regress the status. A transition from a state that is not a
//! legal predecessor is ignored and the current record is returned, so a
//! redelivered step cannot undo progress made by a later one.

mod job;
mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::kernel::jobs::HandlerError;

pub use job::{merge_result, Job, JobStatus};
pub use memory::MemoryJobTracker;
pub use postgres::PostgresJobTracker;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already exists")]
    AlreadyExists(String),

    #[error("job result must be a JSON object, got {0}")]
    InvalidResult(serde_json::Value),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[async_trait]
pub trait JobTracker: Send + Sync {
    /// Create a pending job. Fails with `AlreadyExists` if the id is taken.
    async fn create_job(&self, job_id: &str) -> TrackerResult<Job>;

    async fn mark_running(&self, job_id: &str) -> TrackerResult<Job>;

    /// Merge `partial` (a JSON object) into the result of a non-terminal job.
    async fn update_result(&self, job_id: &str, partial: serde_json::Value) -> TrackerResult<Job>;

    /// Merge the final contribution and set `completed_at`.
    async fn mark_completed(
        &self,
        job_id: &str,
        final_result: serde_json::Value,
    ) -> TrackerResult<Job>;

    async fn mark_failed(&self, job_id: &str, error: &str) -> TrackerResult<Job>;

    async fn get_status(&self, job_id: &str) -> TrackerResult<Job>;

    /// Most recently created jobs first.
    async fn list_jobs(&self, offset: i64, limit: i64) -> TrackerResult<Vec<Job>>;
}

impl From<TrackerError> for HandlerError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_) | TrackerError::InvalidResult(_) => Self::permanent(err),
            TrackerError::AlreadyExists(_) | TrackerError::Database(_) => Self::retryable(err),
        }
    }
}

pub(crate) fn ensure_object(value: serde_json::Value) -> TrackerResult<serde_json::Value> {
    match value {
        serde_json::Value::Object(_) => Ok(value),
        serde_json::Value::Null => Ok(serde_json::Value::Object(Default::default())),
        other => Err(TrackerError::InvalidResult(other)),
    }
}
