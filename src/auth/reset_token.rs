/// Password Reset Token Engine
///
/// Reset tokens are single-use, expire after a short window (30 minutes by
/// default) and are stored as SHA-256 digests. Consuming a token sets the
/// owner's password hash and marks the token used in one store operation:
/// either both happen or neither does.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::password::{hash_off_thread, PasswordHasher};
use crate::auth::secret::{generate_secret, hash_secret, RESET_TOKEN_LENGTH};
use crate::error::{AppError, AuthError, TokenError};
use crate::store::{CredentialStore, ResetTokenRecord, User};

pub struct ResetTokenEngine {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    ttl: Duration,
}

fn rejected(kind: TokenError) -> AppError {
    AppError::Auth(AuthError::ResetRejected(kind))
}

impl ResetTokenEngine {
    pub fn new(store: Arc<dyn CredentialStore>, hasher: Arc<dyn PasswordHasher>, ttl: Duration) -> Self {
        Self { store, hasher, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a reset token for `user`. Returns the plaintext once.
    pub async fn issue(&self, user: &User) -> Result<String, AppError> {
        let plaintext = generate_secret(RESET_TOKEN_LENGTH);
        let now = Utc::now();

        self.store
            .insert_reset_token(ResetTokenRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                token_hash: hash_secret(&plaintext),
                used: false,
                created_at: now,
                expires_at: now + self.ttl,
            })
            .await?;

        tracing::info!(user_id = %user.id, "Password reset token issued");
        Ok(plaintext)
    }

    /// Consume `plaintext` and set the owner's password to `new_password`.
    ///
    /// Returns the owner's id. The error carries the precise kind for
    /// auditing; callers must present every kind the same way.
    pub async fn consume(&self, plaintext: &str, new_password: &str) -> Result<Uuid, AppError> {
        // Lookup is by digest, so a wrong value surfaces here as NotFound
        let record = self
            .store
            .find_reset_token(&hash_secret(plaintext))
            .await?
            .ok_or_else(|| rejected(TokenError::NotFound))?;

        if record.used {
            tracing::warn!(user_id = %record.user_id, "Attempt to reuse password reset token");
            return Err(rejected(TokenError::AlreadyUsed));
        }

        if record.is_expired(Utc::now()) {
            tracing::info!(user_id = %record.user_id, "Password reset token expired");
            return Err(rejected(TokenError::Expired));
        }

        let password_hash = hash_off_thread(self.hasher.clone(), new_password).await?;

        // Re-checked atomically by the store: a concurrent consume or the
        // clock passing expires_at while we hashed both land here.
        if !self
            .store
            .consume_reset_token(record.id, &password_hash, Utc::now())
            .await?
        {
            let kind = if record.is_expired(Utc::now()) {
                TokenError::Expired
            } else {
                TokenError::AlreadyUsed
            };
            tracing::warn!(user_id = %record.user_id, reason = %kind, "Password reset token lost consume race");
            return Err(rejected(kind));
        }

        tracing::info!(user_id = %record.user_id, "Password reset token consumed");
        Ok(record.user_id)
    }
}
