// Business domains
pub mod system;
pub mod users;

use crate::kernel::jobs::ActorRegistry;

/// Registry holding every actor the worker can execute.
pub fn build_registry() -> ActorRegistry {
    let mut registry = ActorRegistry::new();
    system::register_actors(&mut registry);
    users::register_actors(&mut registry);
    registry
}
