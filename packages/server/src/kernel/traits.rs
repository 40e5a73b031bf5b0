// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Workflow steps are domain functions that use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseUserSource)

use anyhow::Result;
use async_trait::async_trait;

use crate::domains::users::models::{ExternalUser, NewUser, SaveSummary, User};

// =============================================================================
// User Source Trait (Infrastructure - upstream user directory)
// =============================================================================

#[async_trait]
pub trait BaseUserSource: Send + Sync {
    /// Fetch every user the upstream directory lists
    async fn fetch_users(&self) -> Result<Vec<ExternalUser>>;
}

// =============================================================================
// User Repository Trait (Infrastructure - users table)
// =============================================================================

#[async_trait]
pub trait BaseUserRepository: Send + Sync {
    /// Insert users, skipping those whose username or email already exists
    async fn insert_users(&self, users: &[NewUser]) -> Result<SaveSummary>;

    async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>>;

    async fn count_users(&self) -> Result<i64>;
}
