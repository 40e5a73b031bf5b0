// Durable Job Queue - Core
//
// This crate provides a PostgreSQL-backed message queue with retries and
// dead-lettering, chained workflows whose progress is tracked per job, and a
// cron scheduler that enqueues periodic messages exactly once per minute.

pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
