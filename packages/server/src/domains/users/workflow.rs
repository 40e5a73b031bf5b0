//! The `process_users` workflow: a four-step actor chain.
//!
//! ```text
//! start_workflow(job_id)
//!     │  create job (pending)
//!     └─► users.fetch      ─► job running, result.users_fetched
//!           └─► users.transform ─► result.users_transformed
//!                 └─► users.delay     ─► result.delay_info, save sent with a visibility delay
//!                       └─► users.save      ─► job completed, result.database_result
//! ```
//!
//! Each step records its contribution before sending the next step. Next
//! steps carry the dedupe key `"{job_id}:{step}"`, so a redelivered step
//! cannot fork the chain. A step that fails permanently, or on its last
//! attempt, marks the job failed.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::models::{ExternalUser, NewUser};
use crate::kernel::jobs::{ActorContext, ActorMessage, ActorRegistry, HandlerError, QueueStoreExt};
use crate::kernel::tracker::TrackerError;
use crate::kernel::ServerDeps;

pub const STEPS_COMPLETED: u32 = 4;

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchUsers {
    pub job_id: String,
}

impl ActorMessage for FetchUsers {
    const ACTOR: &'static str = "users.fetch";

    fn dedupe_key(&self) -> Option<String> {
        Some(format!("{}:fetch", self.job_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformUsers {
    pub job_id: String,
    pub users: Vec<ExternalUser>,
}

impl ActorMessage for TransformUsers {
    const ACTOR: &'static str = "users.transform";

    fn dedupe_key(&self) -> Option<String> {
        Some(format!("{}:transform", self.job_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayUsers {
    pub job_id: String,
    pub users: Vec<NewUser>,
}

impl ActorMessage for DelayUsers {
    const ACTOR: &'static str = "users.delay";

    fn dedupe_key(&self) -> Option<String> {
        Some(format!("{}:delay", self.job_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveUsers {
    pub job_id: String,
    pub users: Vec<NewUser>,
}

impl ActorMessage for SaveUsers {
    const ACTOR: &'static str = "users.save";

    fn dedupe_key(&self) -> Option<String> {
        Some(format!("{}:save", self.job_id))
    }
}

// =============================================================================
// Entry point
// =============================================================================

/// Create a pending job and enqueue the first step. Returns the job id.
///
/// A fresh UUID is used when `job_id` is `None`.
pub async fn start_workflow(deps: &ServerDeps, job_id: Option<String>) -> Result<String> {
    let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    deps.jobs
        .create_job(&job_id)
        .await
        .with_context(|| format!("Failed to create job {job_id}"))?;

    let enqueued = deps
        .queue
        .send(&FetchUsers {
            job_id: job_id.clone(),
        })
        .await
        .with_context(|| format!("Failed to enqueue first step of job {job_id}"))?;

    info!(job_id = %job_id, message_id = %enqueued.message_id(), "users workflow started");
    Ok(job_id)
}

pub fn register_actors(registry: &mut ActorRegistry) {
    registry.register(|msg: FetchUsers, ctx: ActorContext| async move {
        let job_id = msg.job_id.clone();
        run_step(&ctx, &job_id, "fetch", fetch_users(msg, &ctx)).await
    });
    registry.register(|msg: TransformUsers, ctx: ActorContext| async move {
        let job_id = msg.job_id.clone();
        run_step(&ctx, &job_id, "transform", transform_users(msg, &ctx)).await
    });
    registry.register(|msg: DelayUsers, ctx: ActorContext| async move {
        let job_id = msg.job_id.clone();
        run_step(&ctx, &job_id, "delay", delay_users(msg, &ctx)).await
    });
    registry.register(|msg: SaveUsers, ctx: ActorContext| async move {
        let job_id = msg.job_id.clone();
        run_step(&ctx, &job_id, "save", save_users(msg, &ctx)).await
    });
}

/// Run one step; record the job as failed when the error is final.
///
/// If the failure itself cannot be recorded, the step is retried while
/// attempts remain.
async fn run_step<F>(ctx: &ActorContext, job_id: &str, step: &str, work: F) -> Result<(), HandlerError>
where
    F: Future<Output = Result<(), HandlerError>>,
{
    let result = work.await;

    if let Err(err) = &result {
        if err.is_permanent() || ctx.is_final_attempt() {
            let message = format!("Workflow failed for job {job_id} at step {step}: {err}");
            error!(job_id = %job_id, step, attempts = ctx.attempts + 1, error = %err, "workflow step failed permanently");
            if let Err(e) = ctx.deps.jobs.mark_failed(job_id, &message).await {
                error!(job_id = %job_id, error = %e, "failed to record job failure");
                // Run the step again rather than leave the job running forever
                if !ctx.is_final_attempt() {
                    return Err(HandlerError::retryable(
                        anyhow::Error::new(e)
                            .context(format!("recording failure of job {job_id} at step {step}")),
                    ));
                }
            }
        }
    }
    result
}

// =============================================================================
// Steps
// =============================================================================

async fn fetch_users(msg: FetchUsers, ctx: &ActorContext) -> Result<(), HandlerError> {
    let deps = &ctx.deps;

    // Scheduled runs arrive without a job created by start_workflow
    match deps.jobs.create_job(&msg.job_id).await {
        Ok(_) | Err(TrackerError::AlreadyExists(_)) => {}
        Err(e) => return Err(e.into()),
    }
    deps.jobs.mark_running(&msg.job_id).await?;

    info!(job_id = %msg.job_id, "fetching users from directory");
    let users = deps
        .user_source
        .fetch_users()
        .await
        .map_err(HandlerError::retryable)?;

    deps.jobs
        .update_result(&msg.job_id, json!({ "users_fetched": users.len() }))
        .await?;

    deps.queue
        .send(&TransformUsers {
            job_id: msg.job_id,
            users,
        })
        .await?;
    Ok(())
}

async fn transform_users(msg: TransformUsers, ctx: &ActorContext) -> Result<(), HandlerError> {
    let deps = &ctx.deps;

    let users = msg
        .users
        .into_iter()
        .map(ExternalUser::into_new_user)
        .collect::<Result<Vec<NewUser>, _>>()
        .map_err(HandlerError::permanent)?;

    info!(job_id = %msg.job_id, count = users.len(), "users transformed");
    deps.jobs
        .update_result(&msg.job_id, json!({ "users_transformed": users.len() }))
        .await?;

    deps.queue
        .send(&DelayUsers {
            job_id: msg.job_id,
            users,
        })
        .await?;
    Ok(())
}

/// Pick the processing delay and hand the users to the save step, which only
/// becomes visible once the delay has passed. No worker sits idle meanwhile.
async fn delay_users(msg: DelayUsers, ctx: &ActorContext) -> Result<(), HandlerError> {
    let deps = &ctx.deps;
    let delay = random_delay(deps.workflow.min_delay, deps.workflow.max_delay);

    info!(job_id = %msg.job_id, delay_secs = delay.as_secs(), "simulating processing delay");
    deps.jobs
        .update_result(
            &msg.job_id,
            json!({
                "delay_info": {
                    "delay_seconds": delay.as_secs(),
                    "message": format!("Processed with {}s delay", delay.as_secs()),
                }
            }),
        )
        .await?;

    deps.queue
        .send_with_delay(
            &SaveUsers {
                job_id: msg.job_id,
                users: msg.users,
            },
            delay,
        )
        .await?;
    Ok(())
}

async fn save_users(msg: SaveUsers, ctx: &ActorContext) -> Result<(), HandlerError> {
    let deps = &ctx.deps;

    let summary = deps
        .users
        .insert_users(&msg.users)
        .await
        .map_err(HandlerError::retryable)?;

    info!(
        job_id = %msg.job_id,
        created = summary.users_created,
        skipped = summary.users_skipped,
        "users saved"
    );

    deps.jobs
        .mark_completed(
            &msg.job_id,
            json!({
                "database_result": summary,
                "workflow_completed": true,
                "steps_completed": STEPS_COMPLETED,
            }),
        )
        .await?;
    Ok(())
}

/// Whole seconds in `[min, max]`.
fn random_delay(min: Duration, max: Duration) -> Duration {
    let (min, max) = (min.as_secs(), max.as_secs().max(min.as_secs()));
    Duration::from_secs(rand::thread_rng().gen_range(min..=max))
}
