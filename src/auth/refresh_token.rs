/// Refresh Token Engine
///
/// Handles refresh token issuance, verification, rotation and revocation.
/// Refresh tokens are:
/// - Cryptographically secure random 64-character strings
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Single-use: every successful verification revokes the presented token
///   and issues a replacement in the same store transaction
/// - Looked up scoped to the presenting user and the presented value, never
///   by "latest active token"
///
/// Per-token states: `Active -> Revoked` (stored), `Active -> Expired`
/// (derived from `expires_at <= now`).

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::secret::{generate_secret, hash_secret, REFRESH_TOKEN_LENGTH};
use crate::error::{AppError, AuthError, TokenError};
use crate::store::{CredentialStore, RefreshTokenRecord};

/// Result of a revocation request. Revoking twice is reported, not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked { user_id: Uuid },
    AlreadyRevoked { user_id: Uuid },
    Unknown,
}

pub struct RefreshTokenEngine {
    store: Arc<dyn CredentialStore>,
    ttl: Duration,
}

fn rejected(kind: TokenError) -> AppError {
    AppError::Auth(AuthError::RefreshRejected(kind))
}

impl RefreshTokenEngine {
    pub fn new(store: Arc<dyn CredentialStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn new_record(&self, user_id: Uuid) -> (String, RefreshTokenRecord) {
        let plaintext = generate_secret(REFRESH_TOKEN_LENGTH);
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_secret(&plaintext),
            revoked: false,
            created_at: now,
            expires_at: now + self.ttl,
        };
        (plaintext, record)
    }

    /// Issue a new refresh token for `user_id`.
    ///
    /// Returns the plaintext; this is the only time it exists server-side.
    pub async fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        let (plaintext, record) = self.new_record(user_id);
        self.store.insert_refresh_token(record).await?;

        tracing::debug!(user_id = %user_id, "Refresh token issued");
        Ok(plaintext)
    }

    /// Resolve the owner of a presented token, whatever its state.
    pub async fn owner_of(&self, plaintext: &str) -> Result<Option<Uuid>, AppError> {
        let record = self.store.find_refresh_token(&hash_secret(plaintext)).await?;
        Ok(record.map(|r| r.user_id))
    }

    /// Verify `plaintext` for `user_id`, revoke it and issue a replacement.
    ///
    /// # Errors
    /// `RefreshRejected` with the precise kind:
    /// - `NotFound`: no token with this value belongs to this user
    /// - `Revoked`: already rotated or logged out (possible theft signal),
    ///   including losing a concurrent rotation race
    /// - `Expired`: `expires_at <= now`
    pub async fn verify_and_rotate(&self, user_id: Uuid, plaintext: &str) -> Result<String, AppError> {
        let token_hash = hash_secret(plaintext);

        // Lookup is by digest, so a wrong value surfaces here as NotFound
        let record = self
            .store
            .find_refresh_token_for_user(user_id, &token_hash)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %user_id, "Refresh token not found for user");
                rejected(TokenError::NotFound)
            })?;

        if record.revoked {
            tracing::warn!(user_id = %user_id, token_id = %record.id, "Attempt to use revoked refresh token");
            return Err(rejected(TokenError::Revoked));
        }

        if record.is_expired(Utc::now()) {
            tracing::info!(user_id = %user_id, token_id = %record.id, "Refresh token expired");
            return Err(rejected(TokenError::Expired));
        }

        let (new_plaintext, replacement) = self.new_record(user_id);
        if !self.store.rotate_refresh_token(record.id, replacement).await? {
            // Another request rotated this token between our read and write
            tracing::warn!(user_id = %user_id, token_id = %record.id, "Refresh token rotated concurrently");
            return Err(rejected(TokenError::Revoked));
        }

        tracing::info!(user_id = %user_id, "Refresh token rotated");
        Ok(new_plaintext)
    }

    /// Revoke the token with this value. Idempotent.
    pub async fn revoke(&self, plaintext: &str) -> Result<RevokeOutcome, AppError> {
        let record = match self.store.find_refresh_token(&hash_secret(plaintext)).await? {
            Some(record) => record,
            None => return Ok(RevokeOutcome::Unknown),
        };

        let user_id = record.user_id;
        if !record.revoked && self.store.revoke_refresh_token(record.id).await? {
            tracing::info!(user_id = %user_id, "Refresh token revoked");
            Ok(RevokeOutcome::Revoked { user_id })
        } else {
            Ok(RevokeOutcome::AlreadyRevoked { user_id })
        }
    }

    /// Revoke every active refresh token of a user (logout everywhere).
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = self.store.revoke_all_refresh_tokens(user_id).await?;
        tracing::info!(user_id = %user_id, revoked = revoked, "All refresh tokens revoked for user");
        Ok(revoked)
    }
}
