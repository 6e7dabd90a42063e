/// Password Hashing and Verification
///
/// The hashing capability is a one-way `hash` plus a `verify` that never
/// errors: anything that cannot be checked verifies as `false`.
///
/// Both are CPU-bound. Async callers go through `hash_off_thread` and
/// `verify_off_thread`, which run them on tokio's blocking pool.

use std::sync::Arc;

use crate::error::AppError;

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, AppError>;
    fn verify(&self, hash: &str, secret: &str) -> bool;
}

/// bcrypt-backed hasher
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, secret: &str) -> Result<String, AppError> {
        bcrypt::hash(secret, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, hash: &str, secret: &str) -> bool {
        match bcrypt::verify(secret, hash) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!("Password verification failed: {}", e);
                false
            }
        }
    }
}

/// Hash on the blocking pool.
pub async fn hash_off_thread(hasher: Arc<dyn PasswordHasher>, secret: &str) -> Result<String, AppError> {
    let secret = secret.to_string();
    tokio::task::spawn_blocking(move || hasher.hash(&secret))
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
}

/// Verify on the blocking pool. A panicked task verifies as `false`.
pub async fn verify_off_thread(hasher: Arc<dyn PasswordHasher>, hash: &str, secret: &str) -> bool {
    let hash = hash.to_string();
    let secret = secret.to_string();
    match tokio::task::spawn_blocking(move || hasher.verify(&hash, &secret)).await {
        Ok(valid) => valid,
        Err(e) => {
            tracing::error!("Password verification task failed: {}", e);
            false
        }
    }
}
