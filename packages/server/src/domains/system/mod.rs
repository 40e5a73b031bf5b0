//! System domain - health and liveness actors.
//!
//! `schedule_heartbeat` is the default periodic entry: once a minute it emits
//! one heartbeat right away and a second one half a minute later, so a
//! healthy worker logs a heartbeat about every 30 seconds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::kernel::jobs::{ActorContext, ActorMessage, ActorRegistry, HandlerError, QueueStoreExt};

pub const HEARTBEAT_SPACING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheck {}

impl ActorMessage for HealthCheck {
    const ACTOR: &'static str = "health_check";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogHeartbeat {}

impl ActorMessage for LogHeartbeat {
    const ACTOR: &'static str = "log_heartbeat";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleHeartbeat {}

impl ActorMessage for ScheduleHeartbeat {
    const ACTOR: &'static str = "schedule_heartbeat";
}

pub fn health_report(now: DateTime<Utc>) -> Value {
    json!({
        "status": "healthy",
        "timestamp": now.to_rfc3339(),
    })
}

pub fn register_actors(registry: &mut ActorRegistry) {
    registry.register(health_check);
    registry.register(log_heartbeat);
    registry.register(schedule_heartbeat);
}

async fn health_check(_msg: HealthCheck, ctx: ActorContext) -> Result<(), HandlerError> {
    let report = health_report(Utc::now());
    info!(message_id = %ctx.message_id, report = %report, "health check");
    Ok(())
}

async fn log_heartbeat(_msg: LogHeartbeat, _ctx: ActorContext) -> Result<(), HandlerError> {
    info!("[heartbeat] {}", Utc::now().to_rfc3339());
    Ok(())
}

async fn schedule_heartbeat(_msg: ScheduleHeartbeat, ctx: ActorContext) -> Result<(), HandlerError> {
    ctx.deps.queue.send(&LogHeartbeat::default()).await?;
    ctx.deps
        .queue
        .send_with_delay(&LogHeartbeat::default(), HEARTBEAT_SPACING)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::MessageId;
    use crate::kernel::TestDependencies;

    fn context(test_deps: &TestDependencies) -> ActorContext {
        ActorContext {
            deps: test_deps.clone().into_server_deps(),
            message_id: MessageId(1),
            attempts: 0,
            max_attempts: 3,
        }
    }

    #[test]
    fn health_report_is_healthy() {
        let report = health_report(Utc::now());
        assert_eq!(report["status"], "healthy");
        assert!(report["timestamp"].is_string());
    }

    #[tokio::test]
    async fn schedule_heartbeat_sends_immediate_and_delayed_heartbeats() {
        let test_deps = TestDependencies::new();
        let before = Utc::now();

        schedule_heartbeat(ScheduleHeartbeat::default(), context(&test_deps))
            .await
            .unwrap();

        let mut heartbeats = test_deps.queue.messages_for(LogHeartbeat::ACTOR).await;
        heartbeats.sort_by_key(|m| m.scheduled_for);
        assert_eq!(heartbeats.len(), 2);
        assert!(heartbeats[0].scheduled_for <= Utc::now());
        assert!(heartbeats[1].scheduled_for >= before + chrono::Duration::seconds(30));
    }

    #[test]
    fn registers_system_actors() {
        let mut registry = ActorRegistry::new();
        register_actors(&mut registry);
        assert_eq!(
            registry.registered_actors(),
            vec!["health_check", "log_heartbeat", "schedule_heartbeat"]
        );
    }
}
