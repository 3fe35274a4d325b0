//! Password hashing and verification.

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use serde::Deserialize;

use crate::error::{AuthError, Result};

/// Argon2id cost parameters used when hashing new secrets.
///
/// Verification reads the parameters back out of the stored PHC string, so
/// changing these only affects users added or changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashParams {
    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| AuthError::PasswordHash(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Hash a password with a fresh salt.
///
/// Runs on the blocking thread pool; Argon2 is deliberately slow.
pub async fn hash_password(password: &str, params: HashParams) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        params
            .hasher()?
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::PasswordHash(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::PasswordHash(format!("task join error: {e}")))?
}

/// Pay for one hash without keeping it. Used where no stored hash exists but
/// the caller must take as long as a real verification.
pub async fn hash_and_discard(password: &str, params: HashParams) {
    if let Err(e) = hash_password(password, params).await {
        tracing::debug!(error = %e, "Discarded hash failed");
    }
}

/// Check a password against a stored PHC hash string.
///
/// A malformed stored hash is an error, not a mismatch.
pub async fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let password = password.to_string();
    let stored = stored.to_string();
    tokio::task::spawn_blocking(move || {
        let parsed =
            PasswordHash::new(&stored).map_err(|e| AuthError::PasswordHash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| AuthError::PasswordHash(format!("task join error: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> HashParams {
        HashParams {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hash = hash_password("s3cret", cheap()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("s3cret", &hash).await.unwrap());
        assert!(!verify_password("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn salts_differ() {
        let a = hash_password("same", cheap()).await.unwrap();
        let b = hash_password("same", cheap()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_hash_is_error() {
        let err = verify_password("x", "not-a-phc-string").await.unwrap_err();
        assert!(matches!(err, AuthError::PasswordHash(_)));
    }

    #[tokio::test]
    async fn invalid_params_rejected() {
        let params = HashParams {
            memory_kib: 0,
            iterations: 1,
            parallelism: 1,
        };
        assert!(hash_password("x", params).await.is_err());
    }
}
