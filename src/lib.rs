//! User accounts: password hashing, validation, and the remember-me,
//! activation and password-reset token flows.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod telemetry;

pub use auth::{
    AccountManager, MemoryUserStore, NewUser, Notifier, PgUserStore, TokenPurpose, User,
    UserChanges, UserStore,
};
pub use config::{AccountConfig, AppConfig, HashCost};
pub use error::{AccountError, Result, ValidationErrors};
