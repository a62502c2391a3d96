use serde::Deserialize;
use time::Duration;

use crate::error::{AccountError, Result};

/// Upper bound on the reset window: one year.
pub const MAX_RESET_EXPIRATION_HOURS: i64 = 24 * 366;

pub const DEFAULT_EMAIL_PATTERN: &str = r"(?i)\A[\w+\-.]+@[a-z\d\-]+(\.[a-z\d\-]+)*\.[a-z]+\z";

/// Work factor for the password/token hasher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashCost {
    /// argon2 library defaults.
    #[default]
    Default,
    /// Smallest legal parameters. Tests and benchmarks only.
    Min,
    Custom {
        m_cost: u32,
        t_cost: u32,
        p_cost: u32,
    },
}

impl HashCost {
    /// `default`, `min`, or an `m_cost,t_cost,p_cost` triple.
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "default" => Some(HashCost::Default),
            "min" => Some(HashCost::Min),
            other => {
                let parts: Vec<u32> = other
                    .split(',')
                    .map(|p| p.trim().parse::<u32>())
                    .collect::<std::result::Result<_, _>>()
                    .ok()?;
                match parts[..] {
                    [m_cost, t_cost, p_cost] => Some(HashCost::Custom {
                        m_cost,
                        t_cost,
                        p_cost,
                    }),
                    _ => None,
                }
            }
        }
    }
}

/// Validation and expiry parameters for user accounts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub name_max_length: usize,
    pub email_min_length: usize,
    pub email_max_length: usize,
    pub email_pattern: String,
    pub password_min_length: usize,
    pub password_max_length: usize,
    pub reset_expiration_hours: i64,
    pub hash_cost: HashCost,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            name_max_length: 50,
            email_min_length: 6,
            email_max_length: 255,
            email_pattern: DEFAULT_EMAIL_PATTERN.to_string(),
            password_min_length: 6,
            password_max_length: 72,
            reset_expiration_hours: 2,
            hash_cost: HashCost::Default,
        }
    }
}

impl AccountConfig {
    pub fn for_tests() -> Self {
        Self {
            hash_cost: HashCost::Min,
            ..Self::default()
        }
    }

    pub fn reset_expiration(&self) -> Duration {
        Duration::seconds(self.reset_expiration_hours.saturating_mul(3600))
    }

    /// Reject settings that would make expiry checks meaningless.
    pub fn check(&self) -> Result<()> {
        let hours = self.reset_expiration_hours;
        if hours <= 0 || hours > MAX_RESET_EXPIRATION_HOURS {
            return Err(AccountError::Config(format!(
                "reset_expiration_hours must be in 1..={MAX_RESET_EXPIRATION_HOURS}, got {hours}"
            )));
        }
        Ok(())
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name_max_length: env_parse("ACCOUNT_NAME_MAX_LENGTH")
                .unwrap_or(defaults.name_max_length),
            email_min_length: env_parse("ACCOUNT_EMAIL_MIN_LENGTH")
                .unwrap_or(defaults.email_min_length),
            email_max_length: env_parse("ACCOUNT_EMAIL_MAX_LENGTH")
                .unwrap_or(defaults.email_max_length),
            email_pattern: std::env::var("ACCOUNT_EMAIL_PATTERN")
                .unwrap_or(defaults.email_pattern),
            password_min_length: env_parse("ACCOUNT_PASSWORD_MIN_LENGTH")
                .unwrap_or(defaults.password_min_length),
            password_max_length: env_parse("ACCOUNT_PASSWORD_MAX_LENGTH")
                .unwrap_or(defaults.password_max_length),
            reset_expiration_hours: env_parse("ACCOUNT_RESET_EXPIRATION_HOURS")
                .unwrap_or(defaults.reset_expiration_hours),
            hash_cost: std::env::var("ACCOUNT_HASH_COST")
                .ok()
                .and_then(|v| HashCost::parse(&v))
                .unwrap_or(defaults.hash_cost),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub accounts: AccountConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL")?;
        Ok(Self {
            database_url,
            accounts: AccountConfig::from_env(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
