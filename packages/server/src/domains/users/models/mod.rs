pub mod external_user;
pub mod user;

pub use external_user::{ExternalUser, InvalidUser};
pub use user::{NewUser, SaveSummary, User};
