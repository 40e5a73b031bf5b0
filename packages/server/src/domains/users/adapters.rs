//! Production implementations of the user infrastructure traits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{ExternalUser, NewUser, SaveSummary, User};
use crate::kernel::{BaseUserRepository, BaseUserSource};

/// Upstream user directory reached over HTTP (JSONPlaceholder-compatible).
pub struct HttpUserSource {
    url: String,
    client: reqwest::Client,
}

impl HttpUserSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl BaseUserSource for HttpUserSource {
    async fn fetch_users(&self) -> Result<Vec<ExternalUser>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch users from {}", self.url))?
            .error_for_status()
            .context("User directory returned an error status")?;

        response
            .json::<Vec<ExternalUser>>()
            .await
            .context("Failed to parse user directory response")
    }
}

/// Users table access for workflow steps.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseUserRepository for PgUserRepository {
    async fn insert_users(&self, users: &[NewUser]) -> Result<SaveSummary> {
        User::insert_many(users, &self.pool).await
    }

    async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        User::find_paginated(offset, limit, &self.pool).await
    }

    async fn count_users(&self) -> Result<i64> {
        User::count(&self.pool).await
    }
}
