use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::{ensure_object, Job, JobStatus, JobTracker, TrackerError, TrackerResult};

const JOB_COLUMNS: &str =
    "id, job_id, status, result, error, created_at, updated_at, completed_at";

/// Job tracker backed by the `job_status` table.
///
/// Every write is one conditional `UPDATE … RETURNING`: the `WHERE` clause
/// lists the legal predecessor states and the result merge happens in SQL, so
/// overlapping attempts of the same step are serialized by the row lock.
#[derive(Clone)]
pub struct PostgresJobTracker {
    pool: PgPool,
}

impl PostgresJobTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find(&self, job_id: &str) -> TrackerResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_status WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Resolve a conditional update that matched no row.
    async fn unchanged(&self, job_id: &str, attempted: JobStatus) -> TrackerResult<Job> {
        let job = self
            .find(job_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            warn!(
                job_id = %job_id,
                current = %job.status,
                attempted = %attempted,
                "ignoring update of finished job"
            );
        } else {
            debug!(job_id = %job_id, current = %job.status, attempted = %attempted, "status unchanged");
        }
        Ok(job)
    }
}

#[async_trait]
impl JobTracker for PostgresJobTracker {
    async fn create_job(&self, job_id: &str) -> TrackerResult<Job> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO job_status (job_id, status)
            VALUES ($1, 'pending')
            ON CONFLICT (job_id) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        job.ok_or_else(|| TrackerError::AlreadyExists(job_id.to_string()))
    }

    async fn mark_running(&self, job_id: &str) -> TrackerResult<Job> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE job_status
            SET status = 'running', updated_at = NOW()
            WHERE job_id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => self.unchanged(job_id, JobStatus::Running).await,
        }
    }

    async fn update_result(&self, job_id: &str, partial: serde_json::Value) -> TrackerResult<Job> {
        let partial = ensure_object(partial)?;
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE job_status
            SET result = result || $2, updated_at = NOW()
            WHERE job_id = $1 AND status IN ('pending', 'running')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(&partial)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => {
                let job = self
                    .find(job_id)
                    .await?
                    .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))?;
                warn!(job_id = %job_id, status = %job.status, "ignoring result update of finished job");
                Ok(job)
            }
        }
    }

    async fn mark_completed(
        &self,
        job_id: &str,
        final_result: serde_json::Value,
    ) -> TrackerResult<Job> {
        let final_result = ensure_object(final_result)?;
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE job_status
            SET status = 'completed',
                result = result || $2,
                error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE job_id = $1 AND status IN ('pending', 'running')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(&final_result)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => self.unchanged(job_id, JobStatus::Completed).await,
        }
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> TrackerResult<Job> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE job_status
            SET status = 'failed',
                error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE job_id = $1 AND status IN ('pending', 'running')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => self.unchanged(job_id, JobStatus::Failed).await,
        }
    }

    async fn get_status(&self, job_id: &str) -> TrackerResult<Job> {
        self.find(job_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))
    }

    async fn list_jobs(&self, offset: i64, limit: i64) -> TrackerResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM job_status
            ORDER BY created_at DESC, id
            OFFSET $1
            LIMIT $2
            "#
        ))
        .bind(offset.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }
}
