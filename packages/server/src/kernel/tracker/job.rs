//! Workflow job status model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "workflow_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Forward-only: pending → running → completed | failed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_id: String,
    pub status: JobStatus,
    /// Accumulated step contributions, always a JSON object
    pub result: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            status: JobStatus::Pending,
            result: serde_json::Value::Object(Default::default()),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Look up a top-level key of the result.
    pub fn result_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.result.get(key)
    }
}

/// Shallow merge of `partial` into `target`, the same as Postgres `jsonb || jsonb`
/// on two objects. Keys absent from `partial` are left untouched.
pub fn merge_result(target: &mut serde_json::Value, partial: &serde_json::Value) {
    let Some(partial) = partial.as_object() else {
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(Default::default());
    }
    if let Some(target) = target.as_object_mut() {
        for (key, value) in partial {
            target.insert(key.clone(), value.clone());
        }
    }
}
