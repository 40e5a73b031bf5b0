#![allow(dead_code)]

// Common test utilities

pub mod harness;

pub use harness::*;

use queue_core::kernel::jobs::EnqueueRequest;
use uuid::Uuid;

/// A name no other test uses, so tests sharing one database stay apart.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// A `test.echo` message on `queue`.
pub fn echo_request(queue: &str, n: i64) -> EnqueueRequest {
    EnqueueRequest::builder()
        .actor_name("test.echo")
        .queue_name(queue)
        .args(serde_json::json!({ "n": n }))
        .build()
}
