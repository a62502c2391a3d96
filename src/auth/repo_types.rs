use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
///
/// `*_token` fields hold plaintext tokens for the current request only. They
/// are never written by a store and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_digest: Option<String>,
    #[serde(skip_serializing)]
    pub remember_digest: Option<String>,
    #[serde(skip_serializing)]
    pub activation_digest: Option<String>,
    pub activated: bool,
    pub activated_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub reset_digest: Option<String>,
    pub reset_sent_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,

    #[sqlx(skip)]
    #[serde(skip)]
    pub remember_token: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub activation_token: Option<String>,
    #[sqlx(skip)]
    #[serde(skip)]
    pub reset_token: Option<String>,
}

impl User {
    /// Unsaved record; the store assigns `id` and timestamps on create.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::nil(),
            name: name.into(),
            email: email.into(),
            password_digest: None,
            remember_digest: None,
            activation_digest: None,
            activated: false,
            activated_at: None,
            reset_digest: None,
            reset_sent_at: None,
            created_at: now,
            updated_at: now,
            remember_token: None,
            activation_token: None,
            reset_token: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_nil()
    }
}

/// Registration input.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub password_confirmation: Option<String>,
}

/// Profile update input. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

/// One column written by a partial update. No validation runs for these.
#[derive(Debug, Clone, PartialEq)]
pub enum UserField {
    PasswordDigest(Option<String>),
    RememberDigest(Option<String>),
    ActivationDigest(Option<String>),
    Activated(bool),
    ActivatedAt(Option<OffsetDateTime>),
    ResetDigest(Option<String>),
    ResetSentAt(Option<OffsetDateTime>),
}

impl UserField {
    pub fn column(&self) -> &'static str {
        match self {
            UserField::PasswordDigest(_) => "password_digest",
            UserField::RememberDigest(_) => "remember_digest",
            UserField::ActivationDigest(_) => "activation_digest",
            UserField::Activated(_) => "activated",
            UserField::ActivatedAt(_) => "activated_at",
            UserField::ResetDigest(_) => "reset_digest",
            UserField::ResetSentAt(_) => "reset_sent_at",
        }
    }

    /// Copy this value onto an in-memory record.
    pub fn apply(&self, user: &mut User) {
        match self {
            UserField::PasswordDigest(v) => user.password_digest = v.clone(),
            UserField::RememberDigest(v) => user.remember_digest = v.clone(),
            UserField::ActivationDigest(v) => user.activation_digest = v.clone(),
            UserField::Activated(v) => user.activated = *v,
            UserField::ActivatedAt(v) => user.activated_at = *v,
            UserField::ResetDigest(v) => user.reset_digest = v.clone(),
            UserField::ResetSentAt(v) => user.reset_sent_at = *v,
        }
    }
}
