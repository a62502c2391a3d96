use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::auth::notifier::Notifier;
use crate::auth::password::DigestHasher;
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, User, UserChanges, UserField};
use crate::auth::tokens::{self, TokenPurpose};
use crate::auth::validation::Validator;
use crate::config::AccountConfig;
use crate::error::Result;

/// Password hashing, token issuance and the remember / activation / reset
/// flows for user records.
///
/// Every step that a framework would run as a save hook is an explicit call
/// here: [`normalize`](Self::normalize) before any save and
/// [`create_activation_digest`](Self::create_activation_digest) before create.
pub struct AccountManager {
    config: Arc<AccountConfig>,
    hasher: DigestHasher,
    validator: Validator,
    store: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
}

impl AccountManager {
    pub fn new(
        config: AccountConfig,
        store: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.check()?;
        let config = Arc::new(config);
        let hasher = DigestHasher::new(config.hash_cost)?;
        let validator = Validator::new(Arc::clone(&config))?;
        Ok(Self {
            config,
            hasher,
            validator,
            store,
            notifier,
        })
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    // ---- Hashing ----

    pub fn digest(&self, secret: &str) -> Result<String> {
        self.hasher.digest(secret)
    }

    pub fn verify(&self, secret: &str, digest: &str) -> bool {
        self.hasher.verify(secret, digest)
    }

    pub fn new_token(&self) -> String {
        tokens::new_token()
    }

    /// Issue a token and its digest.
    fn issue(&self) -> Result<(String, String)> {
        let token = tokens::new_token();
        let digest = self.hasher.digest(&token)?;
        Ok((token, digest))
    }

    // ---- Record lifecycle ----

    /// Runs before every save.
    pub fn normalize(&self, user: &mut User) {
        user.email = user.email.to_lowercase();
    }

    /// Runs before create. The token stays in memory for
    /// [`send_activation`](Self::send_activation).
    pub fn create_activation_digest(&self, user: &mut User) -> Result<()> {
        let (token, digest) = self.issue()?;
        user.activation_token = Some(token);
        user.activation_digest = Some(digest);
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn register(&self, input: NewUser) -> Result<User> {
        let errors = self.validator.validate_new_user(&input);
        if !errors.is_empty() {
            warn!(%errors, "registration rejected");
            return Err(errors.into());
        }

        let mut user = User::new(input.name, input.email);
        self.normalize(&mut user);
        user.password_digest = Some(self.hasher.digest(&input.password)?);
        self.create_activation_digest(&mut user)?;

        let created = self.store.create(&user).await?;
        info!(user_id = %created.id, email = %created.email, "user registered");
        Ok(created)
    }

    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn update_profile(&self, user: &mut User, changes: UserChanges) -> Result<()> {
        let errors = self.validator.validate_changes(&changes);
        if !errors.is_empty() {
            warn!(%errors, "profile update rejected");
            return Err(errors.into());
        }

        let mut updated = user.clone();
        if let Some(name) = changes.name {
            updated.name = name;
        }
        if let Some(email) = changes.email {
            updated.email = email;
        }
        self.normalize(&mut updated);
        if let Some(password) = changes.password {
            updated.password_digest = Some(self.hasher.digest(&password)?);
        }

        *user = self.store.save(&updated).await?;
        info!("profile updated");
        Ok(())
    }

    /// Check a plaintext password against the stored digest.
    pub fn authenticate_password(&self, user: &User, password: &str) -> bool {
        match user.password_digest.as_deref() {
            Some(digest) => self.hasher.verify(password, digest),
            None => false,
        }
    }

    /// Missing digest and wrong token are both `false`.
    pub fn authenticated(&self, user: &User, purpose: TokenPurpose, token: &str) -> bool {
        let digest = match purpose {
            TokenPurpose::Remember => user.remember_digest.as_deref(),
            TokenPurpose::Activation => user.activation_digest.as_deref(),
            TokenPurpose::Reset => user.reset_digest.as_deref(),
        };
        let Some(digest) = digest else {
            debug!(user_id = %user.id, purpose = ?purpose, "no digest on record");
            return false;
        };
        let ok = self.hasher.verify(token, digest);
        if !ok {
            debug!(user_id = %user.id, purpose = ?purpose, "token mismatch");
        }
        ok
    }

    // ---- Remember me ----

    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn remember(&self, user: &mut User) -> Result<()> {
        let (token, digest) = self.issue()?;
        let field = UserField::RememberDigest(Some(digest));
        self.store
            .update_fields(user.id, std::slice::from_ref(&field))
            .await?;
        field.apply(user);
        user.remember_token = Some(token);
        debug!("remember token issued");
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn forget(&self, user: &mut User) -> Result<()> {
        let field = UserField::RememberDigest(None);
        self.store
            .update_fields(user.id, std::slice::from_ref(&field))
            .await?;
        field.apply(user);
        user.remember_token = None;
        debug!("remember digest cleared");
        Ok(())
    }

    // ---- Activation ----

    pub async fn send_activation(&self, user: &User) {
        match user.activation_token.as_deref() {
            Some(token) => self.notifier.send_activation(user, token).await,
            None => warn!(user_id = %user.id, "no activation token in memory; nothing sent"),
        }
    }

    /// One-way. Activating an active user keeps the first `activated_at`.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn activate(&self, user: &mut User) -> Result<()> {
        if user.activated && user.activated_at.is_some() {
            debug!("already activated");
            return Ok(());
        }
        let fields = [
            UserField::Activated(true),
            UserField::ActivatedAt(Some(OffsetDateTime::now_utc())),
        ];
        self.store.update_fields(user.id, &fields).await?;
        for field in &fields {
            field.apply(user);
        }
        info!("user activated");
        Ok(())
    }

    // ---- Password reset ----

    /// Replaces any earlier reset token.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn create_reset_digest(&self, user: &mut User) -> Result<()> {
        let (token, digest) = self.issue()?;
        let fields = [
            UserField::ResetDigest(Some(digest)),
            UserField::ResetSentAt(Some(OffsetDateTime::now_utc())),
        ];
        self.store.update_fields(user.id, &fields).await?;
        for field in &fields {
            field.apply(user);
        }
        user.reset_token = Some(token);
        info!("password reset issued");
        Ok(())
    }

    pub async fn send_password_reset(&self, user: &User) {
        match user.reset_token.as_deref() {
            Some(token) => self.notifier.send_password_reset(user, token).await,
            None => warn!(user_id = %user.id, "no reset token in memory; nothing sent"),
        }
    }

    pub fn reset_expired(&self, user: &User) -> bool {
        self.reset_expired_at(user, OffsetDateTime::now_utc())
    }

    /// A user with no reset on record counts as expired. A deadline past the
    /// representable range never expires.
    pub fn reset_expired_at(&self, user: &User, now: OffsetDateTime) -> bool {
        let Some(sent_at) = user.reset_sent_at else {
            return true;
        };
        match sent_at.checked_add(self.config.reset_expiration()) {
            Some(deadline) => now > deadline,
            None => false,
        }
    }

    /// Look up a user by email, lowercasing it the way records are stored.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store.find_by_email(&email.to_lowercase()).await
    }

    /// Set a new password and retire the reset token that authorised it.
    #[instrument(skip_all, fields(user_id = %user.id))]
    pub async fn reset_password(
        &self,
        user: &mut User,
        password: &str,
        confirmation: Option<&str>,
    ) -> Result<()> {
        let errors = self.validator.validate_password(password, confirmation);
        if !errors.is_empty() {
            warn!(%errors, "password reset rejected");
            return Err(errors.into());
        }
        let fields = [
            UserField::PasswordDigest(Some(self.hasher.digest(password)?)),
            UserField::ResetDigest(None),
            UserField::ResetSentAt(None),
        ];
        self.store.update_fields(user.id, &fields).await?;
        for field in &fields {
            field.apply(user);
        }
        user.reset_token = None;
        info!("password reset completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::MemoryUserStore;
    use crate::error::AccountError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Uuid, &'static str, String)>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(Uuid, &'static str, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_activation(&self, user: &User, token: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((user.id, "activation", token.to_string()));
        }

        async fn send_password_reset(&self, user: &User, token: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((user.id, "reset", token.to_string()));
        }
    }

    struct Fixture {
        manager: AccountManager,
        store: Arc<MemoryUserStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryUserStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = AccountManager::new(
            AccountConfig::for_tests(),
            store.clone() as Arc<dyn UserStore>,
            notifier.clone() as Arc<dyn Notifier>,
        )
        .expect("manager builds");
        Fixture {
            manager,
            store,
            notifier,
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Example User".into(),
            email: email.into(),
            password: "foobar".into(),
            password_confirmation: Some("foobar".into()),
        }
    }

    #[test]
    fn digest_verifies_only_its_own_secret() {
        let f = fixture();
        let digest = f.manager.digest("s3cret").unwrap();
        assert!(f.manager.verify("s3cret", &digest));
        assert!(!f.manager.verify("other", &digest));
        assert!(!f.manager.verify("s3cret", ""));
        assert_ne!(f.manager.new_token(), f.manager.new_token());
    }

    #[tokio::test]
    async fn register_lowercases_email_and_creates_activation_digest() {
        let f = fixture();
        let user = f.manager.register(new_user("Foo@Bar.com")).await.unwrap();

        assert_eq!(user.email, "foo@bar.com");
        assert!(!user.activated);
        assert!(user.activated_at.is_none());
        let stored = f.store.load(user.id).await.unwrap();
        assert_eq!(stored.email, "foo@bar.com");
        assert!(!stored.activation_digest.as_deref().unwrap_or("").is_empty());

        let token = user.activation_token.clone().expect("token held in memory");
        assert!(f.manager.authenticated(&stored, TokenPurpose::Activation, &token));
        assert!(f.manager.authenticate_password(&stored, "foobar"));
        assert!(!f.manager.authenticate_password(&stored, "foobaz"));
    }

    #[tokio::test]
    async fn register_rejects_invalid_input_without_persisting() {
        let f = fixture();
        let mut input = new_user("not-an-email");
        input.password = "short".into();
        input.password_confirmation = None;

        let err = f.manager.register(input).await.unwrap_err();
        match err {
            AccountError::Validation(errors) => {
                assert!(errors.has("email"));
                assert!(errors.has("password"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.store.latest(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejects_taken_email_case_insensitively() {
        let f = fixture();
        f.manager.register(new_user("dup@example.com")).await.unwrap();
        let err = f
            .manager
            .register(new_user("DUP@example.com"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn remember_then_forget() {
        let f = fixture();
        let mut user = f.manager.register(new_user("r@example.com")).await.unwrap();

        f.manager.remember(&mut user).await.unwrap();
        let token = user.remember_token.clone().unwrap();
        assert!(f.manager.authenticated(&user, TokenPurpose::Remember, &token));
        let stored = f.store.load(user.id).await.unwrap();
        assert!(f.manager.authenticated(&stored, TokenPurpose::Remember, &token));

        f.manager.forget(&mut user).await.unwrap();
        assert!(!f.manager.authenticated(&user, TokenPurpose::Remember, &token));
        let stored = f.store.load(user.id).await.unwrap();
        assert!(stored.remember_digest.is_none());
    }

    #[tokio::test]
    async fn new_remember_token_invalidates_old_one() {
        let f = fixture();
        let mut user = f.manager.register(new_user("two@example.com")).await.unwrap();
        f.manager.remember(&mut user).await.unwrap();
        let first = user.remember_token.clone().unwrap();
        f.manager.remember(&mut user).await.unwrap();
        let second = user.remember_token.clone().unwrap();

        assert!(!f.manager.authenticated(&user, TokenPurpose::Remember, &first));
        assert!(f.manager.authenticated(&user, TokenPurpose::Remember, &second));
    }

    #[tokio::test]
    async fn authenticated_is_false_without_digest() {
        let f = fixture();
        let user = f.manager.register(new_user("n@example.com")).await.unwrap();
        assert!(!f.manager.authenticated(&user, TokenPurpose::Remember, ""));
        assert!(!f.manager.authenticated(&user, TokenPurpose::Reset, "whatever"));
    }

    #[tokio::test]
    async fn activation_is_sent_with_plaintext_token_and_is_one_way() {
        let f = fixture();
        let mut user = f.manager.register(new_user("a@example.com")).await.unwrap();
        f.manager.send_activation(&user).await;

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "activation");
        assert_eq!(Some(&sent[0].2), user.activation_token.as_ref());
        assert_ne!(Some(&sent[0].2), user.activation_digest.as_ref());

        f.manager.activate(&mut user).await.unwrap();
        assert!(user.activated);
        let first_at = user.activated_at.expect("activated_at set");
        let stored = f.store.load(user.id).await.unwrap();
        assert!(stored.activated);
        assert_eq!(stored.activated_at, Some(first_at));

        f.manager.activate(&mut user).await.unwrap();
        assert_eq!(user.activated_at, Some(first_at));
    }

    #[tokio::test]
    async fn loaded_user_has_no_activation_token_to_send() {
        let f = fixture();
        let user = f.manager.register(new_user("l@example.com")).await.unwrap();
        let loaded = f.store.load(user.id).await.unwrap();
        f.manager.send_activation(&loaded).await;
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn reset_digest_expires_after_window() {
        let f = fixture();
        let mut user = f.manager.register(new_user("p@example.com")).await.unwrap();
        assert!(f.manager.reset_expired(&user));

        f.manager.create_reset_digest(&mut user).await.unwrap();
        let sent_at = user.reset_sent_at.expect("reset_sent_at set");
        let window = f.manager.config().reset_expiration();

        assert!(!f.manager.reset_expired(&user));
        assert!(!f.manager.reset_expired_at(&user, sent_at));
        assert!(!f.manager.reset_expired_at(&user, sent_at + window));
        assert!(f
            .manager
            .reset_expired_at(&user, sent_at + window + Duration::seconds(1)));

        let token = user.reset_token.clone().unwrap();
        assert!(f.manager.authenticated(&user, TokenPurpose::Reset, &token));
        f.manager.send_password_reset(&user).await;
        let sent = f.notifier.sent();
        assert_eq!(sent.last().map(|s| s.1), Some("reset"));
        assert_eq!(sent.last().map(|s| s.2.clone()), Some(token));
    }

    #[test]
    fn manager_rejects_out_of_range_reset_window() {
        for hours in [0, -3, 1_000_000_000] {
            let config = AccountConfig {
                reset_expiration_hours: hours,
                ..AccountConfig::for_tests()
            };
            let result = AccountManager::new(
                config,
                Arc::new(MemoryUserStore::new()),
                Arc::new(RecordingNotifier::default()),
            );
            assert!(
                matches!(result, Err(AccountError::Config(_))),
                "{hours} hours should be rejected"
            );
        }
    }

    #[test]
    fn reset_deadline_past_calendar_end_does_not_panic() {
        let f = fixture();
        let mut user = User::new("late", "late@example.com");
        let sent_at = OffsetDateTime::from_unix_timestamp(253_402_300_000).unwrap();
        user.reset_sent_at = Some(sent_at);

        assert!(!f.manager.reset_expired_at(&user, sent_at));
        assert!(!f.manager.reset_expired(&user));
    }

    #[tokio::test]
    async fn reset_password_retires_reset_token() {
        let f = fixture();
        let mut user = f.manager.register(new_user("x@example.com")).await.unwrap();
        f.manager.create_reset_digest(&mut user).await.unwrap();
        let token = user.reset_token.clone().unwrap();

        let err = f
            .manager
            .reset_password(&mut user, "newpass", Some("mismatch"))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        f.manager
            .reset_password(&mut user, "newpass", Some("newpass"))
            .await
            .unwrap();
        let stored = f.store.load(user.id).await.unwrap();
        assert!(f.manager.authenticate_password(&stored, "newpass"));
        assert!(!f.manager.authenticate_password(&stored, "foobar"));
        assert!(!f.manager.authenticated(&stored, TokenPurpose::Reset, &token));
        assert!(stored.reset_sent_at.is_none());
    }

    #[tokio::test]
    async fn update_profile_normalizes_and_keeps_password_when_absent() {
        let f = fixture();
        let mut user = f.manager.register(new_user("old@example.com")).await.unwrap();
        let digest_before = user.password_digest.clone();

        f.manager
            .update_profile(
                &mut user,
                UserChanges {
                    name: Some("Renamed".into()),
                    email: Some("New@Example.COM".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(user.name, "Renamed");
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.password_digest, digest_before);
        let stored = f.store.find_by_email("new@example.com").await.unwrap();
        assert_eq!(stored.map(|u| u.id), Some(user.id));
        let found = f.manager.find_by_email("NEW@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn update_profile_validation_failure_leaves_user_untouched() {
        let f = fixture();
        let mut user = f.manager.register(new_user("keep@example.com")).await.unwrap();
        let err = f
            .manager
            .update_profile(
                &mut user,
                UserChanges {
                    name: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(user.name, "Example User");
    }

    #[tokio::test]
    async fn flows_on_unsaved_user_surface_store_errors() {
        let f = fixture();
        let mut user = User::new("ghost", "ghost@example.com");
        let err = f.manager.remember(&mut user).await.unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
        assert!(user.remember_token.is_none());
        assert!(user.remember_digest.is_none());
    }
}
