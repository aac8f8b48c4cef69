pub mod repo;
pub mod repo_types;

pub use repo::{PgUserRepository, UserRepoError, UserRepository};
pub use repo_types::{SignUpRequest, User, UserStatus};
