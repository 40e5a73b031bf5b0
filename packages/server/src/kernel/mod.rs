//! Kernel module - queue infrastructure and dependencies.

pub mod deps;
pub mod jobs;
pub mod scheduler;
pub mod test_dependencies;
pub mod tracker;
pub mod traits;

pub use deps::{ServerDeps, WorkflowSettings};
pub use test_dependencies::{MockUserRepository, MockUserSource, TestDependencies};
pub use traits::*;
