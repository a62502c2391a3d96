use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::auth::repo_types::{NewUser, UserChanges};
use crate::config::{AccountConfig, DEFAULT_EMAIL_PATTERN};
use crate::error::{AccountError, Result, ValidationErrors};

lazy_static! {
    static ref DEFAULT_EMAIL_RE: Regex =
        Regex::new(DEFAULT_EMAIL_PATTERN).expect("default email pattern compiles");
}

/// Field rules for user records, built once from an [`AccountConfig`].
#[derive(Debug, Clone)]
pub struct Validator {
    config: Arc<AccountConfig>,
    email_re: Regex,
}

impl Validator {
    pub fn new(config: Arc<AccountConfig>) -> Result<Self> {
        let email_re = if config.email_pattern == DEFAULT_EMAIL_PATTERN {
            DEFAULT_EMAIL_RE.clone()
        } else {
            Regex::new(&config.email_pattern)
                .map_err(|e| AccountError::Config(format!("email_pattern: {e}")))?
        };
        Ok(Self { config, email_re })
    }

    pub fn is_valid_email(&self, email: &str) -> bool {
        self.email_re.is_match(email)
    }

    pub fn validate_new_user(&self, input: &NewUser) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        self.check_name(&input.name, &mut errors);
        self.check_email(&input.email, &mut errors);
        self.check_password(
            &input.password,
            input.password_confirmation.as_deref(),
            &mut errors,
        );
        errors
    }

    pub fn validate_changes(&self, changes: &UserChanges) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if let Some(name) = &changes.name {
            self.check_name(name, &mut errors);
        }
        if let Some(email) = &changes.email {
            self.check_email(email, &mut errors);
        }
        if let Some(password) = &changes.password {
            self.check_password(password, changes.password_confirmation.as_deref(), &mut errors);
        }
        errors
    }

    pub fn validate_password(&self, password: &str, confirmation: Option<&str>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        self.check_password(password, confirmation, &mut errors);
        errors
    }

    fn check_name(&self, name: &str, errors: &mut ValidationErrors) {
        if name.trim().is_empty() {
            errors.add("name", "can't be blank");
        }
        let max = self.config.name_max_length;
        if name.chars().count() > max {
            errors.add("name", format!("is too long (maximum is {max} characters)"));
        }
    }

    fn check_email(&self, email: &str, errors: &mut ValidationErrors) {
        if email.trim().is_empty() {
            errors.add("email", "can't be blank");
            return;
        }
        let len = email.chars().count();
        let (min, max) = (self.config.email_min_length, self.config.email_max_length);
        if len < min {
            errors.add("email", format!("is too short (minimum is {min} characters)"));
        }
        if len > max {
            errors.add("email", format!("is too long (maximum is {max} characters)"));
        }
        if !self.is_valid_email(email) {
            errors.add("email", "is invalid");
        }
    }

    fn check_password(
        &self,
        password: &str,
        confirmation: Option<&str>,
        errors: &mut ValidationErrors,
    ) {
        if password.trim().is_empty() {
            errors.add("password", "can't be blank");
            return;
        }
        let len = password.chars().count();
        let (min, max) = (
            self.config.password_min_length,
            self.config.password_max_length,
        );
        if len < min {
            errors.add("password", format!("is too short (minimum is {min} characters)"));
        }
        if password.len() > max {
            errors.add("password", format!("is too long (maximum is {max} bytes)"));
        }
        if let Some(confirmation) = confirmation {
            if confirmation != password {
                errors.add("password_confirmation", "doesn't match Password");
            }
        }
    }
}
