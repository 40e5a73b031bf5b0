//! Users domain - pulls the public user directory into the users table
//! through the `process_users` actor chain.

pub mod adapters;
pub mod models;
pub mod workflow;

pub use adapters::{HttpUserSource, PgUserRepository};
pub use models::{ExternalUser, InvalidUser, NewUser, SaveSummary, User};
pub use workflow::{
    register_actors, start_workflow, DelayUsers, FetchUsers, SaveUsers, TransformUsers,
};
