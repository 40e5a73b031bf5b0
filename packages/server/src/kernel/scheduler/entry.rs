//! Schedule entries and their configuration file.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use cron::Schedule;
use serde::Deserialize;
use typed_builder::TypedBuilder;

use super::{ScheduleError, ScheduleResult};
use crate::domains::system::ScheduleHeartbeat;
use crate::kernel::jobs::{ActorMessage, EnqueueRequest, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE};

/// A recurring message: `actor_name` is enqueued whenever `cron` matches.
#[derive(Debug, Clone, PartialEq, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ScheduleEntry {
    /// Stable identifier; ticks are recorded per id, so renaming an entry
    /// re-arms it for the current minute
    pub id: String,

    /// Five fields (minute granularity) or six with a leading seconds field
    pub cron: String,

    pub actor_name: String,

    #[serde(default = "default_queue")]
    #[builder(default = DEFAULT_QUEUE.to_string())]
    pub queue_name: String,

    /// Actor arguments; unit-like messages take the empty object
    #[serde(default = "default_args")]
    #[builder(default = default_args())]
    pub args: serde_json::Value,

    #[serde(default = "default_max_attempts")]
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i32,
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_args() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_max_attempts() -> i32 {
    DEFAULT_MAX_ATTEMPTS
}

impl ScheduleEntry {
    /// The expression in the six-field form the cron engines expect.
    pub fn normalized_cron(&self) -> ScheduleResult<String> {
        normalize_cron(&self.cron).ok_or_else(|| ScheduleError::InvalidCron {
            id: self.id.clone(),
            expression: self.cron.clone(),
            reason: "expected 5 or 6 fields".to_string(),
        })
    }

    pub fn schedule(&self) -> ScheduleResult<Schedule> {
        let expression = self.normalized_cron()?;
        Schedule::from_str(&expression).map_err(|e| ScheduleError::InvalidCron {
            id: self.id.clone(),
            expression: self.cron.clone(),
            reason: e.to_string(),
        })
    }

    /// Whether the schedule fires at any instant within the minute starting at `minute`.
    pub fn matches_minute(&self, minute: DateTime<Utc>) -> ScheduleResult<bool> {
        let minute = truncate_to_minute(minute);
        let next = self
            .schedule()?
            .after(&(minute - Duration::seconds(1)))
            .next();

        Ok(next.is_some_and(|at| at < minute + Duration::minutes(1)))
    }

    pub fn request(&self) -> EnqueueRequest {
        EnqueueRequest::builder()
            .actor_name(self.actor_name.clone())
            .queue_name(self.queue_name.clone())
            .args(self.args.clone())
            .max_attempts(self.max_attempts)
            .build()
    }
}

/// Prepend a zero seconds field to five-field expressions.
pub fn normalize_cron(expression: &str) -> Option<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Some(format!("0 {}", fields.join(" "))),
        6 => Some(fields.join(" ")),
        _ => None,
    }
}

pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::minutes(1)).unwrap_or(at)
}

/// Built-in schedule used when no file is configured.
pub fn default_schedule() -> Vec<ScheduleEntry> {
    vec![ScheduleEntry::builder()
        .id("heartbeat")
        .cron("* * * * *")
        .actor_name(ScheduleHeartbeat::ACTOR)
        .build()]
}

#[derive(Debug, Deserialize)]
struct ScheduleFile {
    #[serde(default, rename = "schedule")]
    entries: Vec<ScheduleEntry>,
}

/// Load the schedule from a TOML file, or the defaults when `path` is `None`.
///
/// ```toml
/// [[schedule]]
/// id = "heartbeat"
/// cron = "* * * * *"
/// actor_name = "schedule_heartbeat"
/// ```
pub fn load_schedule(path: Option<&Path>) -> ScheduleResult<Vec<ScheduleEntry>> {
    let entries = match path {
        Some(path) => parse_schedule(&std::fs::read_to_string(path)?)?,
        None => default_schedule(),
    };
    validate(&entries)?;
    Ok(entries)
}

pub fn parse_schedule(contents: &str) -> ScheduleResult<Vec<ScheduleEntry>> {
    let file: ScheduleFile = toml::from_str(contents)?;
    Ok(file.entries)
}

pub fn validate(entries: &[ScheduleEntry]) -> ScheduleResult<()> {
    let mut ids = HashSet::new();
    for entry in entries {
        if !ids.insert(entry.id.as_str()) {
            return Err(ScheduleError::DuplicateId(entry.id.clone()));
        }
        entry.schedule()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(cron: &str) -> ScheduleEntry {
        ScheduleEntry::builder()
            .id("test")
            .cron(cron)
            .actor_name("noop")
            .build()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
    }

    #[test]
    fn five_field_expressions_get_a_seconds_field() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("30 0 9 * * *").unwrap(), "30 0 9 * * *");
        assert!(normalize_cron("* *").is_none());
    }

    #[test]
    fn every_minute_matches_any_minute() {
        assert!(entry("* * * * *").matches_minute(at(10, 17, 42)).unwrap());
    }

    #[test]
    fn step_expression_matches_only_its_minutes() {
        let every_five = entry("*/5 * * * *");
        assert!(every_five.matches_minute(at(10, 15, 0)).unwrap());
        assert!(every_five.matches_minute(at(10, 15, 59)).unwrap());
        assert!(!every_five.matches_minute(at(10, 16, 0)).unwrap());
    }

    #[test]
    fn six_field_expression_with_seconds_matches_its_minute() {
        let half_past = entry("30 45 * * * *");
        assert!(half_past.matches_minute(at(3, 45, 0)).unwrap());
        assert!(!half_past.matches_minute(at(3, 46, 0)).unwrap());
    }

    #[test]
    fn invalid_cron_is_reported_with_entry_id() {
        let err = entry("61 * * * *").schedule().unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { ref id, .. } if id == "test"));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let entries = parse_schedule(
            r#"
            [[schedule]]
            id = "cleanup"
            cron = "0 3 * * *"
            actor_name = "health_check"

            [[schedule]]
            id = "reports"
            cron = "0 0 8 * * *"
            actor_name = "users.fetch"
            queue_name = "reports"
            max_attempts = 5
            args = { job_id = "nightly" }
            "#,
        )
        .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].queue_name, DEFAULT_QUEUE);
        assert_eq!(entries[0].max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(entries[1].queue_name, "reports");
        assert_eq!(entries[1].args["job_id"], "nightly");
        validate(&entries).unwrap();
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let entries = vec![entry("* * * * *"), entry("*/2 * * * *")];
        assert!(matches!(validate(&entries), Err(ScheduleError::DuplicateId(_))));
    }

    #[test]
    fn default_schedule_runs_heartbeat_every_minute() {
        let entries = load_schedule(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor_name, "schedule_heartbeat");
        assert!(entries[0].matches_minute(at(0, 0, 0)).unwrap());
    }
}
