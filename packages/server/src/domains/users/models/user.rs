use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// User model - SQL persistence layer
///
/// Rows are only ever inserted by the save step of the users workflow.
/// `username` and `email` are unique; re-saving the same users is a no-op.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<serde_json::Value>,
    pub company: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated user ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<serde_json::Value>,
    pub company: Option<serde_json::Value>,
}

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub users_created: usize,
    /// Users that already existed (same username or email)
    pub users_skipped: usize,
    pub user_ids: Vec<i64>,
}

impl User {
    /// Insert users in one statement, skipping any that conflict with an existing row.
    pub async fn insert_many(users: &[NewUser], pool: &PgPool) -> Result<SaveSummary> {
        if users.is_empty() {
            return Ok(SaveSummary::default());
        }

        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
        let usernames: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        let emails: Vec<&str> = users.iter().map(|u| u.email.as_str()).collect();
        let phones: Vec<Option<&str>> = users.iter().map(|u| u.phone.as_deref()).collect();
        let websites: Vec<Option<&str>> = users.iter().map(|u| u.website.as_deref()).collect();
        let addresses: Vec<Option<serde_json::Value>> =
            users.iter().map(|u| u.address.clone()).collect();
        let companies: Vec<Option<serde_json::Value>> =
            users.iter().map(|u| u.company.clone()).collect();

        let user_ids = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (name, username, email, phone, website, address, company)
            SELECT * FROM UNNEST(
                $1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                $6::jsonb[], $7::jsonb[]
            )
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&names)
        .bind(&usernames)
        .bind(&emails)
        .bind(&phones)
        .bind(&websites)
        .bind(&addresses)
        .bind(&companies)
        .fetch_all(pool)
        .await?;

        Ok(SaveSummary {
            users_created: user_ids.len(),
            users_skipped: users.len() - user_ids.len(),
            user_ids,
        })
    }

    /// Find users with offset pagination, oldest first
    pub async fn find_paginated(offset: i64, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM users ORDER BY id OFFSET $1 LIMIT $2")
            .bind(offset.max(0))
            .bind(limit.max(0))
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_username(username: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn count(pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }
}
