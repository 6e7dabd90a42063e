/// Credential Store
///
/// Durable records for users, refresh tokens and reset tokens. Records refer
/// to their owner by id; nothing holds a back-reference.
///
/// Compound operations (`rotate_refresh_token`, `consume_reset_token`) are
/// atomic: implementations run them in one transaction (or under one lock)
/// and guard on the current state so that concurrent callers presenting the
/// same token cannot both succeed.

mod memory;
mod postgres;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    /// Normalised (trimmed, lowercase), unique
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    /// Consecutive failed logins since the last success or lock
    pub failed_attempts: i32,
    /// Logins are refused until this instant
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if now < until)
    }
}

/// Failed-login lockout thresholds.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: i32,
    pub lockout: chrono::Duration,
}

/// Fields supplied on registration.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the plaintext, unique across all refresh tokens
    pub token_hash: String,
    /// Monotonic: false -> true, never back
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

#[derive(Debug, Clone)]
pub struct ResetTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the plaintext, unique across all reset tokens
    pub token_hash: String,
    /// Monotonic: false -> true, never back
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ResetTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }
}

/// Expiry is inclusive: a token is dead at `expires_at` itself.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with `UniqueConstraintViolation` when the email is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    /// Returns false when no such user exists.
    async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<bool, DatabaseError>;

    /// Returns false when no such user exists.
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError>;

    /// Counts one failed login. Reaching `max_failed_attempts` sets
    /// `locked_until = now + lockout` and restarts the count. Returns the
    /// resulting `locked_until`, or `None` when no such user exists or no
    /// lock is set.
    async fn record_failed_login(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        policy: LockoutPolicy,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    /// Clears the failure count and any lock.
    async fn clear_failed_logins(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Fails with `UniqueConstraintViolation` when the hash already exists.
    async fn insert_refresh_token(&self, token: RefreshTokenRecord) -> Result<(), DatabaseError>;

    /// Lookup by hash alone, in any state.
    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, DatabaseError>;

    /// Lookup scoped to one user, in any state. With several matches the
    /// most recently created wins.
    async fn find_refresh_token_for_user(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError>;

    /// Revokes `old_id` if it is still active and stores `replacement`, as one
    /// unit. Returns false (and stores nothing) when `old_id` was already
    /// revoked or does not exist.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, DatabaseError>;

    /// Returns true only for the call that flipped the flag.
    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Returns how many active tokens were revoked.
    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, DatabaseError>;

    /// Fails with `UniqueConstraintViolation` when the hash already exists.
    async fn insert_reset_token(&self, token: ResetTokenRecord) -> Result<(), DatabaseError>;

    async fn find_reset_token(&self, token_hash: &str) -> Result<Option<ResetTokenRecord>, DatabaseError>;

    /// Marks the token used and sets the owner's password hash, as one unit,
    /// if the token is unused and `expires_at > now`. Returns false (and
    /// changes nothing) otherwise.
    async fn consume_reset_token(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}
