//! Actor registry for decoding and executing queue messages.
//!
//! The registry maps actor names (e.g., "users.fetch") to handlers. Each
//! registration captures the concrete message type, so the worker can claim a
//! row from the store and dispatch it without knowing that type.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::error::{HandlerError, QueueError};
use super::message::{MessageId, QueueMessage};
use super::queue::ActorMessage;
use crate::kernel::ServerDeps;

/// Delivery context handed to every handler alongside its message.
#[derive(Clone)]
pub struct ActorContext {
    pub deps: Arc<ServerDeps>,
    pub message_id: MessageId,
    /// Failed deliveries before this one.
    pub attempts: i32,
    pub max_attempts: i32,
}

impl ActorContext {
    pub fn for_message(message: &QueueMessage, deps: Arc<ServerDeps>) -> Self {
        Self {
            deps,
            message_id: message.id,
            attempts: message.attempts,
            max_attempts: message.max_attempts,
        }
    }

    /// True when a retryable failure now would still dead-letter the message.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

type BoxedHandler = Box<dyn Fn(serde_json::Value, ActorContext) -> HandlerFuture + Send + Sync>;

/// Registry that maps actor names to handlers.
///
/// Each domain registers its actors at startup.
///
/// ```ignore
/// let mut registry = ActorRegistry::new();
/// registry.register(|msg: FetchUsers, ctx| async move {
///     fetch_users(msg, &ctx).await
/// });
/// ```
#[derive(Default)]
pub struct ActorRegistry {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `M::ACTOR`. A second registration replaces the first.
    pub fn register<M, F, Fut>(&mut self, handler: F)
    where
        M: ActorMessage + DeserializeOwned + 'static,
        F: Fn(M, ActorContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |value, ctx| {
            let handler = handler.clone();
            Box::pin(async move {
                let message: M = serde_json::from_value(value).map_err(QueueError::from)?;
                handler(message, ctx).await
            }) as HandlerFuture
        });

        self.handlers.insert(M::ACTOR, boxed);
    }

    /// Execute a claimed message with its registered handler.
    ///
    /// Unknown actors and undecodable arguments fail permanently.
    pub async fn dispatch(
        &self,
        message: &QueueMessage,
        deps: Arc<ServerDeps>,
    ) -> Result<(), HandlerError> {
        let handler = self
            .handlers
            .get(message.actor_name.as_str())
            .ok_or_else(|| QueueError::UnknownActor(message.actor_name.clone()))?;

        let ctx = ActorContext::for_message(message, deps);
        handler(message.args.clone(), ctx).await
    }

    pub fn is_registered(&self, actor_name: &str) -> bool {
        self.handlers.contains_key(actor_name)
    }

    pub fn registered_actors(&self) -> Vec<&'static str> {
        let mut actors: Vec<_> = self.handlers.keys().copied().collect();
        actors.sort_unstable();
        actors
    }
}

pub type SharedActorRegistry = Arc<ActorRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::message::MessageState;
    use crate::kernel::TestDependencies;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Greet {
        name: String,
    }

    impl ActorMessage for Greet {
        const ACTOR: &'static str = "test.greet";
    }

    async fn noop(_msg: Greet, _ctx: ActorContext) -> Result<(), HandlerError> {
        Ok(())
    }

    fn claimed(actor: &str, args: serde_json::Value) -> QueueMessage {
        let now = Utc::now();
        QueueMessage {
            id: MessageId(7),
            queue_name: "default".into(),
            actor_name: actor.into(),
            args,
            state: MessageState::Consumed,
            enqueued_at: now,
            scheduled_for: now,
            attempts: 2,
            max_attempts: 3,
            lock_owner: Some("w1".into()),
            lock_expires_at: Some(now),
            dedupe_key: None,
            last_error: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_register_and_check() {
        let mut registry = ActorRegistry::new();
        registry.register(noop);

        assert!(registry.is_registered("test.greet"));
        assert!(!registry.is_registered("test.unknown"));
        assert_eq!(registry.registered_actors(), vec!["test.greet"]);
    }

    #[tokio::test]
    async fn dispatch_decodes_args_and_passes_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ActorRegistry::new();
        {
            let calls = calls.clone();
            registry.register(move |msg: Greet, ctx: ActorContext| {
                let calls = calls.clone();
                async move {
                    assert_eq!(msg.name, "ada");
                    assert_eq!(ctx.message_id, MessageId(7));
                    assert!(ctx.is_final_attempt());
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), HandlerError>(())
                }
            });
        }

        let deps = TestDependencies::new().into_server_deps();
        let message = claimed("test.greet", serde_json::json!({ "name": "ada" }));
        registry.dispatch(&message, deps).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_actor_is_permanent() {
        let registry = ActorRegistry::new();
        let deps = TestDependencies::new().into_server_deps();
        let err = registry
            .dispatch(&claimed("nobody", serde_json::Value::Null), deps)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("nobody"));
    }

    #[tokio::test]
    async fn bad_args_are_permanent() {
        let mut registry = ActorRegistry::new();
        registry.register(noop);
        let deps = TestDependencies::new().into_server_deps();
        let err = registry
            .dispatch(&claimed("test.greet", serde_json::json!({ "nom": 1 })), deps)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
