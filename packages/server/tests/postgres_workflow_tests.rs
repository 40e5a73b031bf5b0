//! The users workflow on Postgres stores, with a mocked user directory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{unique, TestHarness};
use queue_core::domains::build_registry;
use queue_core::domains::users::{start_workflow, NewUser, PgUserRepository};
use queue_core::kernel::jobs::{RetryPolicy, WorkerConfig, WorkerPool};
use queue_core::kernel::test_dependencies::sample_external_users;
use queue_core::kernel::tracker::{JobStatus, JobTracker};
use queue_core::kernel::{BaseUserRepository, MockUserSource, ServerDeps, WorkflowSettings};

fn new_user(tag: &str) -> NewUser {
    NewUser {
        name: format!("User {tag}"),
        username: tag.to_string(),
        email: format!("{tag}@example.org"),
        phone: None,
        website: None,
        address: Some(serde_json::json!({ "city": "Wisokyburgh" })),
        company: None,
    }
}

#[tokio::test]
async fn workflow_completes_on_postgres() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let deps = Arc::new(ServerDeps::new(
        ctx.queue(),
        ctx.tracker(),
        Arc::new(PgUserRepository::new(ctx.db_pool.clone())),
        Arc::new(MockUserSource::new().with_users(sample_external_users(3))),
        WorkflowSettings {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    ));

    let config = WorkerConfig::builder()
        .concurrency(2usize)
        .retry(RetryPolicy::new(Duration::ZERO, Duration::ZERO).without_jitter())
        .build();
    let pool = WorkerPool::new(Arc::new(build_registry()), deps.clone(), config);

    let job_id = start_workflow(&deps, None).await.unwrap();
    assert_eq!(pool.drain().await.unwrap(), 4);

    let job = deps.jobs.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert_eq!(job.result["users_fetched"], 3);
    assert_eq!(job.result["users_transformed"], 3);
    assert_eq!(job.result["database_result"]["users_created"], 3);
    assert_eq!(job.result["steps_completed"], 4);
    assert_eq!(job.result["workflow_completed"], true);

    let saved = deps.users.list_users(0, 100).await.unwrap();
    assert!(saved.iter().any(|u| u.username == "user1"));
    assert!(saved.iter().all(|u| u.email == u.email.to_lowercase()));
}

#[tokio::test]
async fn repository_skips_existing_usernames_and_emails() {
    let Some(ctx) = TestHarness::try_new().await else { return };
    let repo = PgUserRepository::new(ctx.db_pool.clone());
    let a = unique("a");
    let b = unique("b");

    let first = repo.insert_users(&[new_user(&a), new_user(&b)]).await.unwrap();
    assert_eq!(first.users_created, 2);
    assert_eq!(first.user_ids.len(), 2);

    // Same username, and a new username reusing an existing email
    let mut reused_email = new_user(&unique("c"));
    reused_email.email = format!("{b}@example.org");
    let second = repo
        .insert_users(&[new_user(&a), reused_email])
        .await
        .unwrap();
    assert_eq!(second.users_created, 0);
    assert_eq!(second.users_skipped, 2);

    let empty = repo.insert_users(&[]).await.unwrap();
    assert_eq!(empty.users_created, 0);
    assert!(repo.count_users().await.unwrap() >= 2);
}
