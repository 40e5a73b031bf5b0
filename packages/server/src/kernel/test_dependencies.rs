// TestDependencies - mock implementations for testing
//
// Provides in-memory stores and mock services that can be turned into
// ServerDeps for actor and workflow tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::jobs::MemoryQueueStore;
use super::tracker::MemoryJobTracker;
use super::{BaseUserRepository, BaseUserSource, ServerDeps, WorkflowSettings};
use crate::domains::users::models::{ExternalUser, NewUser, SaveSummary, User};

// =============================================================================
// Mock User Source
// =============================================================================

pub struct MockUserSource {
    users: Arc<Mutex<Vec<ExternalUser>>>,
    failures_remaining: Arc<Mutex<usize>>,
    calls: Arc<Mutex<usize>>,
}

impl MockUserSource {
    pub fn new() -> Self {
        Self {
            users: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: Arc::new(Mutex::new(0)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_users(self, users: Vec<ExternalUser>) -> Self {
        *self.users.lock().unwrap() = users;
        self
    }

    /// Fail the next `count` fetches with a transient error
    pub fn failing(self, count: usize) -> Self {
        *self.failures_remaining.lock().unwrap() = count;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Default for MockUserSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseUserSource for MockUserSource {
    async fn fetch_users(&self) -> Result<Vec<ExternalUser>> {
        *self.calls.lock().unwrap() += 1;

        let mut failures = self.failures_remaining.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            anyhow::bail!("user directory unavailable");
        }

        Ok(self.users.lock().unwrap().clone())
    }
}

/// Directory users shaped like the JSONPlaceholder fixtures.
pub fn sample_external_users(count: usize) -> Vec<ExternalUser> {
    (1..=count as i64)
        .map(|id| ExternalUser {
            id,
            name: format!("User {id}"),
            username: format!("user{id}"),
            email: format!("user{id}@example.org"),
            phone: Some(format!("555-010{id}")),
            website: Some(format!("user{id}.example.org")),
            address: Some(serde_json::json!({ "city": "Gwenborough" })),
            company: Some(serde_json::json!({ "name": "Romaguera-Crona" })),
        })
        .collect()
}

// =============================================================================
// Mock User Repository
// =============================================================================

/// Users table stand-in enforcing the unique username and email constraints.
pub struct MockUserRepository {
    users: Arc<Mutex<Vec<User>>>,
}

impl MockUserRepository {
    pub fn new() -> Self {
        Self {
            users: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn stored(&self) -> Vec<User> {
        self.users.lock().unwrap().clone()
    }
}

impl Default for MockUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseUserRepository for MockUserRepository {
    async fn insert_users(&self, new_users: &[NewUser]) -> Result<SaveSummary> {
        let mut users = self.users.lock().unwrap();
        let mut summary = SaveSummary::default();

        for new_user in new_users {
            let conflict = users
                .iter()
                .any(|u| u.username == new_user.username || u.email == new_user.email);
            if conflict {
                summary.users_skipped += 1;
                continue;
            }

            let now = Utc::now();
            let id = users.len() as i64 + 1;
            users.push(User {
                id,
                name: new_user.name.clone(),
                username: new_user.username.clone(),
                email: new_user.email.clone(),
                phone: new_user.phone.clone(),
                website: new_user.website.clone(),
                address: new_user.address.clone(),
                company: new_user.company.clone(),
                created_at: now,
                updated_at: now,
            });
            summary.users_created += 1;
            summary.user_ids.push(id);
        }

        Ok(summary)
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.users.lock().unwrap().len() as i64)
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// In-memory dependencies; clones share the same stores.
#[derive(Clone)]
pub struct TestDependencies {
    pub queue: Arc<MemoryQueueStore>,
    pub jobs: Arc<MemoryJobTracker>,
    pub users: Arc<MockUserRepository>,
    pub user_source: Arc<MockUserSource>,
    pub workflow: WorkflowSettings,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(MemoryQueueStore::new()),
            jobs: Arc::new(MemoryJobTracker::new()),
            users: Arc::new(MockUserRepository::new()),
            user_source: Arc::new(MockUserSource::new()),
            // No pause before saving, so chains drain in one pass
            workflow: WorkflowSettings {
                min_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        }
    }

    /// Set a mock user source
    pub fn mock_source(mut self, source: MockUserSource) -> Self {
        self.user_source = Arc::new(source);
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowSettings) -> Self {
        self.workflow = workflow;
        self
    }

    /// Convert into ServerDeps for testing
    pub fn into_server_deps(self) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            self.queue,
            self.jobs,
            self.users,
            self.user_source,
            self.workflow,
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
