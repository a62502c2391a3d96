use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{User, UserField};
use crate::error::{AccountError, Result, ValidationErrors};

const USER_COLUMNS: &str = "id, name, email, password_digest, remember_digest, activation_digest, \
     activated, activated_at, reset_digest, reset_sent_at, created_at, updated_at";

/// Persistence for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new record, returning it with `id` and timestamps assigned.
    async fn create(&self, user: &User) -> Result<User>;
    async fn load(&self, id: Uuid) -> Result<User>;
    /// Emails are stored lowercase; the argument is lowercased before lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Full update of the profile columns (name, email, password digest).
    async fn save(&self, user: &User) -> Result<User>;
    /// Partial update without validation, used for digest and activation writes.
    async fn update_fields(&self, id: Uuid, fields: &[UserField]) -> Result<()>;
    /// Newest users first.
    async fn latest(&self, limit: i64) -> Result<Vec<User>>;
}

fn email_taken() -> AccountError {
    let mut errors = ValidationErrors::new();
    errors.add("email", "has already been taken");
    AccountError::Validation(errors)
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique_violation(e: sqlx::Error) -> AccountError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return email_taken();
        }
    }
    AccountError::Store(anyhow::Error::new(e))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<User> {
        let sql = format!(
            r#"
            INSERT INTO users (name, email, password_digest, activation_digest, activated, activated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        let mut created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_digest)
            .bind(&user.activation_digest)
            .bind(user.activated)
            .bind(user.activated_at)
            .fetch_one(&self.db)
            .await
            .map_err(map_unique_violation)?;
        created.activation_token = user.activation_token.clone();
        Ok(created)
    }

    async fn load(&self, id: Uuid) -> Result<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("load user")?
            .ok_or(AccountError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email.to_lowercase())
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<User> {
        let sql = format!(
            r#"
            UPDATE users
               SET name = $2, email = $3, password_digest = $4, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let mut saved = sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_digest)
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique_violation)?
            .ok_or(AccountError::NotFound)?;
        saved.remember_token = user.remember_token.clone();
        saved.activation_token = user.activation_token.clone();
        saved.reset_token = user.reset_token.clone();
        Ok(saved)
    }

    async fn update_fields(&self, id: Uuid, fields: &[UserField]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
        {
            let mut set = qb.separated(", ");
            for field in fields {
                set.push(format!("{} = ", field.column()));
                match field {
                    UserField::PasswordDigest(v)
                    | UserField::RememberDigest(v)
                    | UserField::ActivationDigest(v)
                    | UserField::ResetDigest(v) => {
                        set.push_bind_unseparated(v.clone());
                    }
                    UserField::Activated(v) => {
                        set.push_bind_unseparated(*v);
                    }
                    UserField::ActivatedAt(v) | UserField::ResetSentAt(v) => {
                        set.push_bind_unseparated(*v);
                    }
                }
            }
            set.push("updated_at = now()");
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let result = qb
            .build()
            .execute(&self.db)
            .await
            .context("update user fields")?;
        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound);
        }
        Ok(())
    }

    async fn latest(&self, limit: i64) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1");
        let rows = sqlx::query_as::<_, User>(&sql)
            .bind(limit)
            .fetch_all(&self.db)
            .await
            .context("list latest users")?;
        Ok(rows)
    }
}

/// In-process store keyed by id. Token fields are dropped on write, as a
/// database would.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, User>>> {
        self.users
            .lock()
            .map_err(|_| AccountError::Store(anyhow::anyhow!("user store lock poisoned")))
    }
}

fn stored_copy(user: &User) -> User {
    User {
        remember_token: None,
        activation_token: None,
        reset_token: None,
        ..user.clone()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<User> {
        let mut users = self.lock()?;
        if users.values().any(|u| u.email == user.email) {
            return Err(email_taken());
        }
        let now = OffsetDateTime::now_utc();
        let mut row = stored_copy(user);
        row.id = Uuid::new_v4();
        row.created_at = now;
        row.updated_at = now;
        users.insert(row.id, row.clone());

        row.activation_token = user.activation_token.clone();
        Ok(row)
    }

    async fn load(&self, id: Uuid) -> Result<User> {
        self.lock()?.get(&id).cloned().ok_or(AccountError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        Ok(self.lock()?.values().find(|u| u.email == email).cloned())
    }

    async fn save(&self, user: &User) -> Result<User> {
        let mut users = self.lock()?;
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(email_taken());
        }
        let row = users.get_mut(&user.id).ok_or(AccountError::NotFound)?;
        row.name = user.name.clone();
        row.email = user.email.clone();
        row.password_digest = user.password_digest.clone();
        row.updated_at = OffsetDateTime::now_utc();

        let mut saved = row.clone();
        saved.remember_token = user.remember_token.clone();
        saved.activation_token = user.activation_token.clone();
        saved.reset_token = user.reset_token.clone();
        Ok(saved)
    }

    async fn update_fields(&self, id: Uuid, fields: &[UserField]) -> Result<()> {
        let mut users = self.lock()?;
        let row = users.get_mut(&id).ok_or(AccountError::NotFound)?;
        for field in fields {
            field.apply(row);
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn latest(&self, limit: i64) -> Result<Vec<User>> {
        let mut rows: Vec<User> = self.lock()?.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}
