use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::config::HashingConfig;

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashingError(pub String);

/// Argon2id hasher with a configurable work factor.
#[derive(Clone)]
pub struct Hasher {
    params: Params,
    /// Hash of a throwaway password, verified against when no real hash exists
    /// so that failure paths cost the same.
    dummy_hash: Arc<str>,
}

impl Hasher {
    pub fn new(cfg: HashingConfig) -> Result<Self, HashingError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| HashingError(format!("invalid argon2 parameters: {e}")))?;
        let mut hasher = Self {
            params,
            dummy_hash: Arc::from(""),
        };
        let dummy = hasher.hash_password("dummy-password-for-timing")?;
        hasher.dummy_hash = Arc::from(dummy);
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash_password(&self, plain: &str) -> Result<String, HashingError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashingError(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Malformed hashes simply fail to match.
    pub fn verify_password(&self, plain: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "stored password hash is malformed");
                return false;
            }
        };
        self.argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burns one verification against the dummy hash.
    pub fn verify_dummy(&self, plain: &str) {
        let _ = self.verify_password(plain, &self.dummy_hash);
    }

    /// [`Self::hash_password`] on the blocking pool.
    pub async fn hash(&self, plain: &str) -> Result<String, HashingError> {
        let hasher = self.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash_password(&plain))
            .await
            .map_err(|e| HashingError(format!("hashing task failed: {e}")))?
    }

    /// Verifies on the blocking pool. With no stored hash, the dummy hash is
    /// checked instead and the result is always `false`.
    pub async fn verify(&self, plain: &str, hash: Option<&str>) -> bool {
        let hasher = self.clone();
        let plain = plain.to_owned();
        let hash = hash.map(str::to_owned);
        let task = tokio::task::spawn_blocking(move || match hash {
            Some(h) => hasher.verify_password(&plain, &h),
            None => {
                hasher.verify_dummy(&plain);
                false
            }
        });
        task.await.unwrap_or_else(|e| {
            error!(error = %e, "verification task failed");
            false
        })
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> Hasher {
    Hasher::new(HashingConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("test hasher")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = test_hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash_password(password).expect("hashing should succeed");
        assert!(hasher.verify_password(password, &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = test_hasher();
        let hash = hasher
            .hash_password("correct-horse-battery-staple")
            .expect("hashing should succeed");
        assert!(!hasher.verify_password("wrong-password", &hash));
    }

    #[test]
    fn same_password_hashes_differently_but_both_verify() {
        let hasher = test_hasher();
        let a = hasher.hash_password("password123").unwrap();
        let b = hasher.hash_password("password123").unwrap();
        assert_ne!(a, b);
        assert!(hasher.verify_password("password123", &a));
        assert!(hasher.verify_password("password123", &b));
    }

    #[test]
    fn verify_returns_false_on_malformed_hash() {
        let hasher = test_hasher();
        assert!(!hasher.verify_password("anything", "not-a-valid-hash"));
        assert!(!hasher.verify_password("anything", ""));
    }

    #[test]
    fn hashes_from_other_work_factors_still_verify() {
        let cheap = test_hasher();
        let other = Hasher::new(HashingConfig {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let hash = other.hash_password("password123").unwrap();
        assert!(cheap.verify_password("password123", &hash));
    }

    #[tokio::test]
    async fn async_wrappers_match_sync_behaviour() {
        let hasher = test_hasher();
        let hash = hasher.hash("password123").await.unwrap();
        assert!(hasher.verify("password123", Some(&hash)).await);
        assert!(!hasher.verify("password124", Some(&hash)).await);
        assert!(!hasher.verify("password123", None).await);
    }

    #[test]
    fn rejects_impossible_work_factor() {
        let err = Hasher::new(HashingConfig {
            memory_kib: 1,
            iterations: 1,
            parallelism: 1,
        })
        .err()
        .expect("memory below minimum must fail");
        assert!(err.to_string().contains("invalid argon2 parameters"));
    }
}
