//! Server dependencies for actors (using traits for testability)
//!
//! This module provides the central dependency container handed to every
//! actor through its `ActorContext`. All external services use trait
//! abstractions so tests can swap in the in-memory versions.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::domains::users::{HttpUserSource, PgUserRepository};
use crate::kernel::jobs::{PostgresQueueStore, QueueStore};
use crate::kernel::tracker::{JobTracker, PostgresJobTracker};
use crate::kernel::{BaseUserRepository, BaseUserSource};

/// Tunables of the users workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Bounds of the random pause before the save step
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to actors (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub queue: Arc<dyn QueueStore>,
    pub jobs: Arc<dyn JobTracker>,
    pub users: Arc<dyn BaseUserRepository>,
    pub user_source: Arc<dyn BaseUserSource>,
    pub workflow: WorkflowSettings,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    pub fn new(
        queue: Arc<dyn QueueStore>,
        jobs: Arc<dyn JobTracker>,
        users: Arc<dyn BaseUserRepository>,
        user_source: Arc<dyn BaseUserSource>,
        workflow: WorkflowSettings,
    ) -> Self {
        Self {
            queue,
            jobs,
            users,
            user_source,
            workflow,
        }
    }

    /// Production wiring: every store on the queue's Postgres pool.
    pub fn postgres(queue: Arc<PostgresQueueStore>, config: &Config) -> Result<Self> {
        let pool = queue.pool().clone();

        Ok(Self::new(
            queue,
            Arc::new(PostgresJobTracker::new(pool.clone())),
            Arc::new(PgUserRepository::new(pool)),
            Arc::new(HttpUserSource::new(config.users_source_url.clone())?),
            config.workflow_settings(),
        ))
    }
}
