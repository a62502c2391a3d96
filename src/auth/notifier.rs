use async_trait::async_trait;

use crate::auth::repo_types::User;

/// Delivers plaintext tokens to the account owner, e.g. by email.
///
/// Fire-and-forget: implementations handle and log their own delivery
/// failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_activation(&self, user: &User, token: &str);
    async fn send_password_reset(&self, user: &User, token: &str);
}
