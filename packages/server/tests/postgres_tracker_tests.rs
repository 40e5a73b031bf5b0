//! Job status tracking against a real Postgres.

mod common;

use common::{unique, TestHarness};
use queue_core::kernel::tracker::{JobStatus, JobTracker, TrackerError};
use serde_json::json;

#[tokio::test]
async fn job_moves_from_pending_to_completed() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let tracker = ctx.tracker();
    let job_id = unique("job");

    let created = tracker.create_job(&job_id).await.unwrap();
    assert_eq!(created.status, JobStatus::Pending);
    assert_eq!(created.result, json!({}));
    assert!(created.completed_at.is_none());

    let running = tracker.mark_running(&job_id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);

    tracker
        .update_result(&job_id, json!({ "users_fetched": 10 }))
        .await
        .unwrap();
    tracker
        .update_result(&job_id, json!({ "users_transformed": 10 }))
        .await
        .unwrap();

    let done = tracker
        .mark_completed(&job_id, json!({ "workflow_completed": true }))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(
        done.result,
        json!({ "users_fetched": 10, "users_transformed": 10, "workflow_completed": true })
    );
}

#[tokio::test]
async fn duplicate_and_missing_jobs_are_errors() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let tracker = ctx.tracker();
    let job_id = unique("job");

    tracker.create_job(&job_id).await.unwrap();
    assert!(matches!(
        tracker.create_job(&job_id).await,
        Err(TrackerError::AlreadyExists(_))
    ));
    assert!(matches!(
        tracker.get_status("no-such-job").await,
        Err(TrackerError::NotFound(_))
    ));
    assert!(matches!(
        tracker.mark_running("no-such-job").await,
        Err(TrackerError::NotFound(_))
    ));
}

#[tokio::test]
async fn finished_jobs_do_not_regress() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let tracker = ctx.tracker();
    let job_id = unique("job");

    tracker.create_job(&job_id).await.unwrap();
    tracker.mark_running(&job_id).await.unwrap();
    tracker
        .mark_completed(&job_id, json!({ "steps_completed": 4 }))
        .await
        .unwrap();

    // Late writes from a redelivered step are ignored
    let after_running = tracker.mark_running(&job_id).await.unwrap();
    assert_eq!(after_running.status, JobStatus::Completed);
    let after_failed = tracker.mark_failed(&job_id, "late failure").await.unwrap();
    assert_eq!(after_failed.status, JobStatus::Completed);
    assert!(after_failed.error.is_none());
    let after_update = tracker
        .update_result(&job_id, json!({ "users_fetched": 99 }))
        .await
        .unwrap();
    assert!(after_update.result.get("users_fetched").is_none());
}

#[tokio::test]
async fn failure_records_the_error() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let tracker = ctx.tracker();
    let job_id = unique("job");

    tracker.create_job(&job_id).await.unwrap();
    tracker
        .update_result(&job_id, json!({ "users_fetched": 3 }))
        .await
        .unwrap();

    let failed = tracker.mark_failed(&job_id, "directory down").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("directory down"));
    assert!(failed.completed_at.is_some());
    assert_eq!(failed.result["users_fetched"], 3);
}

#[tokio::test]
async fn non_object_results_are_rejected() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let tracker = ctx.tracker();
    let job_id = unique("job");

    tracker.create_job(&job_id).await.unwrap();
    assert!(matches!(
        tracker.update_result(&job_id, json!([1, 2, 3])).await,
        Err(TrackerError::InvalidResult(_))
    ));
}

#[tokio::test]
async fn list_jobs_is_newest_first() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let tracker = ctx.tracker();
    let first = unique("older");
    let second = unique("newer");

    tracker.create_job(&first).await.unwrap();
    tracker.create_job(&second).await.unwrap();

    let jobs = tracker.list_jobs(0, 1000).await.unwrap();
    let position = |id: &str| jobs.iter().position(|j| j.job_id == id);
    assert!(position(&second).unwrap() < position(&first).unwrap());

    let page = tracker.list_jobs(0, 1).await.unwrap();
    assert_eq!(page.len(), 1);
}
