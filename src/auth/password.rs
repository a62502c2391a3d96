use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::config::HashCost;
use crate::error::{AccountError, Result};

/// Salted argon2id hashing for passwords and token digests.
#[derive(Debug, Clone)]
pub struct DigestHasher {
    params: Params,
}

impl DigestHasher {
    pub fn new(cost: HashCost) -> Result<Self> {
        let params = match cost {
            HashCost::Default => Ok(Params::default()),
            HashCost::Min => Params::new(
                Params::MIN_M_COST,
                Params::MIN_T_COST,
                Params::MIN_P_COST,
                None,
            ),
            HashCost::Custom {
                m_cost,
                t_cost,
                p_cost,
            } => Params::new(m_cost, t_cost, p_cost, None),
        }
        .map_err(|e| AccountError::Config(format!("argon2 params: {e}")))?;
        Ok(Self { params })
    }

    pub fn digest(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let hash = argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                AccountError::Hash(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// False for an empty or unparseable digest; never errors.
    pub fn verify(&self, secret: &str, digest: &str) -> bool {
        if digest.is_empty() {
            return false;
        }
        let parsed = match PasswordHash::new(digest) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}
