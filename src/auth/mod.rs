mod notifier;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod tokens;
pub mod validation;

pub use notifier::Notifier;
pub use password::DigestHasher;
pub use repo::{MemoryUserStore, PgUserStore, UserStore};
pub use repo_types::{NewUser, User, UserChanges, UserField};
pub use services::AccountManager;
pub use tokens::{new_token, TokenPurpose};
pub use validation::Validator;
