use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use super::{ensure_object, merge_result, Job, JobStatus, JobTracker, TrackerError, TrackerResult};

/// In-memory job tracker with the same transition rules as the Postgres one.
#[derive(Default)]
pub struct MemoryJobTracker {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` when the job may move to `next`; otherwise return it unchanged.
    async fn transition<F>(&self, job_id: &str, next: JobStatus, update: F) -> TrackerResult<Job>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))?;

        if !job.status.can_transition_to(next) {
            if job.status.is_terminal() {
                warn!(job_id = %job_id, current = %job.status, attempted = %next, "ignoring update of finished job");
            }
            return Ok(job.clone());
        }

        let now = Utc::now();
        job.status = next;
        job.updated_at = now;
        if next.is_terminal() {
            job.completed_at = Some(now);
        }
        update(job);
        Ok(job.clone())
    }
}

#[async_trait]
impl JobTracker for MemoryJobTracker {
    async fn create_job(&self, job_id: &str) -> TrackerResult<Job> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(job_id) {
            return Err(TrackerError::AlreadyExists(job_id.to_string()));
        }
        let job = Job::new(job_id);
        jobs.insert(job_id.to_string(), job.clone());
        Ok(job)
    }

    async fn mark_running(&self, job_id: &str) -> TrackerResult<Job> {
        self.transition(job_id, JobStatus::Running, |_| {}).await
    }

    async fn update_result(&self, job_id: &str, partial: serde_json::Value) -> TrackerResult<Job> {
        let partial = ensure_object(partial)?;
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            warn!(job_id = %job_id, status = %job.status, "ignoring result update of finished job");
            return Ok(job.clone());
        }
        merge_result(&mut job.result, &partial);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn mark_completed(
        &self,
        job_id: &str,
        final_result: serde_json::Value,
    ) -> TrackerResult<Job> {
        let final_result = ensure_object(final_result)?;
        self.transition(job_id, JobStatus::Completed, move |job| {
            merge_result(&mut job.result, &final_result);
            job.error = None;
        })
        .await
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> TrackerResult<Job> {
        let error = error.to_string();
        self.transition(job_id, JobStatus::Failed, move |job| job.error = Some(error))
            .await
    }

    async fn get_status(&self, job_id: &str) -> TrackerResult<Job> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))
    }

    async fn list_jobs(&self, offset: i64, limit: i64) -> TrackerResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_job_rejects_duplicates() {
        let tracker = MemoryJobTracker::new();
        let job = tracker.create_job("J1").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.result, json!({}));

        assert!(matches!(
            tracker.create_job("J1").await,
            Err(TrackerError::AlreadyExists(id)) if id == "J1"
        ));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let tracker = MemoryJobTracker::new();
        assert!(matches!(tracker.get_status("nope").await, Err(TrackerError::NotFound(_))));
        assert!(matches!(tracker.mark_running("nope").await, Err(TrackerError::NotFound(_))));
    }

    #[tokio::test]
    async fn completion_merges_and_stamps_completed_at() {
        let tracker = MemoryJobTracker::new();
        tracker.create_job("J1").await.unwrap();
        tracker.mark_running("J1").await.unwrap();
        tracker
            .update_result("J1", json!({ "users_fetched": 10 }))
            .await
            .unwrap();
        let job = tracker
            .mark_completed("J1", json!({ "database_result": { "inserted": 10 } }))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.result["users_fetched"], 10);
        assert_eq!(job.result["database_result"]["inserted"], 10);
    }

    #[tokio::test]
    async fn terminal_status_never_regresses() {
        let tracker = MemoryJobTracker::new();
        tracker.create_job("J1").await.unwrap();
        let completed = tracker.mark_completed("J1", json!({})).await.unwrap();

        let after_running = tracker.mark_running("J1").await.unwrap();
        let after_failed = tracker.mark_failed("J1", "late failure").await.unwrap();
        let after_update = tracker
            .update_result("J1", json!({ "extra": true }))
            .await
            .unwrap();

        for job in [after_running, after_failed, after_update] {
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.completed_at, completed.completed_at);
            assert!(job.error.is_none());
            assert!(job.result_field("extra").is_none());
        }
    }

    #[tokio::test]
    async fn non_object_results_are_rejected() {
        let tracker = MemoryJobTracker::new();
        tracker.create_job("J1").await.unwrap();
        assert!(matches!(
            tracker.update_result("J1", json!([1, 2])).await,
            Err(TrackerError::InvalidResult(_))
        ));
    }

    #[tokio::test]
    async fn list_jobs_pages_newest_first() {
        let tracker = MemoryJobTracker::new();
        for id in ["a", "b", "c"] {
            tracker.create_job(id).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let page: Vec<String> = tracker
            .list_jobs(0, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(page, vec!["c", "b"]);

        let rest = tracker.list_jobs(2, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].job_id, "a");
    }
}
