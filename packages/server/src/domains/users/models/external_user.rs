use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::user::NewUser;

/// User record as served by the upstream directory API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalUser {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub address: Option<serde_json::Value>,
    #[serde(default)]
    pub company: Option<serde_json::Value>,
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidUser {
    #[error("user {id}: {field} is empty")]
    Empty { id: i64, field: &'static str },

    #[error("user {id}: `{email}` is not an email address")]
    Email { id: i64, email: String },
}

impl ExternalUser {
    /// Validate and convert to the stored shape. Text fields are trimmed and
    /// the email is lowercased.
    pub fn into_new_user(self) -> Result<NewUser, InvalidUser> {
        let id = self.id;
        let required = |field: &'static str, value: String| {
            let value = value.trim().to_string();
            if value.is_empty() {
                Err(InvalidUser::Empty { id, field })
            } else {
                Ok(value)
            }
        };

        let name = required("name", self.name)?;
        let username = required("username", self.username)?;
        let email = required("email", self.email)?.to_lowercase();
        if !is_email(&email) {
            return Err(InvalidUser::Email { id, email });
        }

        let optional = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(NewUser {
            name,
            username,
            email,
            phone: optional(self.phone),
            website: optional(self.website),
            address: self.address.filter(|v| !v.is_null()),
            company: self.company.filter(|v| !v.is_null()),
        })
    }
}

fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}
