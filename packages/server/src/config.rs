use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::{RetryPolicy, WorkerConfig, DEFAULT_QUEUE};
use crate::kernel::WorkflowSettings;

pub const DEFAULT_USERS_SOURCE_URL: &str = "https://jsonplaceholder.typicode.com/users";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub worker_concurrency: usize,
    pub worker_queues: Vec<String>,
    pub poll_interval: Duration,
    pub lock_duration: Duration,
    pub heartbeat_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    /// TOML schedule; the built-in schedule is used when unset
    pub schedule_file: Option<PathBuf>,
    pub users_source_url: String,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |name: &str, default: &str| -> Result<u64> {
            let raw = lookup(name).unwrap_or_else(|| default.to_string());
            parse_value(name, &raw)
        };

        let worker_queues: Vec<String> = lookup("WORKER_QUEUES")
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string())
            .split(',')
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if worker_queues.is_empty() {
            anyhow::bail!("WORKER_QUEUES must name at least one queue");
        }

        let min_delay_secs = parse("MIN_DELAY_SECS", "1")?;
        let max_delay_secs = parse("MAX_DELAY_SECS", "5")?;
        if min_delay_secs > max_delay_secs {
            anyhow::bail!("MIN_DELAY_SECS must not exceed MAX_DELAY_SECS");
        }

        let lock_duration = Duration::from_secs(parse("LOCK_DURATION_SECS", "60")?);
        let heartbeat_interval = Duration::from_secs(parse("HEARTBEAT_INTERVAL_SECS", "20")?);
        if heartbeat_interval.is_zero() || heartbeat_interval >= lock_duration {
            anyhow::bail!(
                "HEARTBEAT_INTERVAL_SECS ({}) must be positive and shorter than LOCK_DURATION_SECS ({})",
                heartbeat_interval.as_secs(),
                lock_duration.as_secs()
            );
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse("DATABASE_MAX_CONNECTIONS", "10")? as u32,
            worker_concurrency: parse("WORKER_CONCURRENCY", "4")?.max(1) as usize,
            worker_queues,
            poll_interval: Duration::from_millis(parse("POLL_INTERVAL_MS", "1000")?),
            lock_duration,
            heartbeat_interval,
            retry_base: Duration::from_millis(parse("RETRY_BASE_MS", "1000")?),
            retry_max: Duration::from_secs(parse("RETRY_MAX_SECS", "3600")?),
            schedule_file: lookup("SCHEDULE_FILE").map(PathBuf::from),
            users_source_url: lookup("USERS_SOURCE_URL")
                .unwrap_or_else(|| DEFAULT_USERS_SOURCE_URL.to_string()),
            min_delay_secs,
            max_delay_secs,
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::builder()
            .concurrency(self.worker_concurrency)
            .queues(self.worker_queues.clone())
            .poll_interval(self.poll_interval)
            .lock_duration(self.lock_duration)
            .heartbeat_interval(self.heartbeat_interval)
            .retry(RetryPolicy::new(self.retry_base, self.retry_max))
            .build()
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            min_delay: Duration::from_secs(self.min_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{name} must be a valid number, got `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/queue")]).unwrap();
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.worker_queues, vec!["default"]);
        assert_eq!(config.lock_duration, Duration::from_secs(60));
        assert_eq!(config.retry_max, Duration::from_secs(3600));
        assert_eq!(config.users_source_url, DEFAULT_USERS_SOURCE_URL);
        assert!(config.schedule_file.is_none());
    }

    #[test]
    fn database_url_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn parses_queue_list_and_numbers() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/queue"),
            ("WORKER_QUEUES", "default, reports ,"),
            ("WORKER_CONCURRENCY", "8"),
            ("POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.worker_queues, vec!["default", "reports"]);
        assert_eq!(config.worker_config().concurrency, 8);
        assert_eq!(config.worker_config().poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_numbers_and_inverted_delays() {
        let bad = config(&[
            ("DATABASE_URL", "postgres://localhost/queue"),
            ("LOCK_DURATION_SECS", "soon"),
        ])
        .unwrap_err();
        assert!(bad.to_string().contains("LOCK_DURATION_SECS"));

        assert!(config(&[
            ("DATABASE_URL", "postgres://localhost/queue"),
            ("MIN_DELAY_SECS", "9"),
            ("MAX_DELAY_SECS", "2"),
        ])
        .is_err());
    }

    #[test]
    fn heartbeat_must_beat_before_the_lock_expires() {
        let err = config(&[
            ("DATABASE_URL", "postgres://localhost/queue"),
            ("LOCK_DURATION_SECS", "30"),
            ("HEARTBEAT_INTERVAL_SECS", "60"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("HEARTBEAT_INTERVAL_SECS"));

        assert!(config(&[
            ("DATABASE_URL", "postgres://localhost/queue"),
            ("LOCK_DURATION_SECS", "30"),
            ("HEARTBEAT_INTERVAL_SECS", "30"),
        ])
        .is_err());

        let ok = config(&[
            ("DATABASE_URL", "postgres://localhost/queue"),
            ("LOCK_DURATION_SECS", "30"),
            ("HEARTBEAT_INTERVAL_SECS", "10"),
        ])
        .unwrap();
        assert_eq!(ok.worker_config().heartbeat_interval, Duration::from_secs(10));
    }
}
