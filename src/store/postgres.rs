//! Postgres-backed credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{CredentialStore, LockoutPolicy, NewUser, RefreshTokenRecord, ResetTokenRecord, User};
use crate::error::DatabaseError;

type UserRow = (
    Uuid,
    String,
    Option<String>,
    String,
    bool,
    i32,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);
type RefreshTokenRow = (Uuid, Uuid, String, bool, DateTime<Utc>, DateTime<Utc>);
type ResetTokenRow = (Uuid, Uuid, String, bool, DateTime<Utc>, DateTime<Utc>);

fn user_from_row(row: UserRow) -> User {
    let (id, email, name, password_hash, is_active, failed_attempts, locked_until, created_at) = row;
    User {
        id,
        email,
        name,
        password_hash,
        is_active,
        failed_attempts,
        locked_until,
        created_at,
    }
}

fn refresh_token_from_row(row: RefreshTokenRow) -> RefreshTokenRecord {
    let (id, user_id, token_hash, revoked, created_at, expires_at) = row;
    RefreshTokenRecord {
        id,
        user_id,
        token_hash,
        revoked,
        created_at,
        expires_at,
    }
}

fn reset_token_from_row(row: ResetTokenRow) -> ResetTokenRecord {
    let (id, user_id, token_hash, used, created_at, expires_at) = row;
    ResetTokenRecord {
        id,
        user_id,
        token_hash,
        used,
        created_at,
        expires_at,
    }
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations. Fatal at startup when it fails.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::UnexpectedError(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, name, password_hash, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, true, $5, $5)
            RETURNING id, email, name, password_hash, is_active, failed_attempts, locked_until, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(user_from_row(row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, password_hash, is_active, failed_attempts, locked_until, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, password_hash, is_active, failed_attempts, locked_until, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }

    async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET is_active = $1, updated_at = $2 WHERE id = $3")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        policy: LockoutPolicy,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        // One statement so concurrent failures cannot lose increments
        let row = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
            r#"
            UPDATE users
            SET failed_attempts = CASE
                    WHEN failed_attempts + 1 >= $1 THEN 0
                    ELSE failed_attempts + 1
                END,
                locked_until = CASE
                    WHEN failed_attempts + 1 >= $1 THEN $2
                    ELSE locked_until
                END,
                updated_at = $3
            WHERE id = $4
            RETURNING locked_until
            "#,
        )
        .bind(policy.max_failed_attempts)
        .bind(now + policy.lockout)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(locked_until,)| locked_until))
    }

    async fn clear_failed_logins(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_attempts = 0, locked_until = NULL, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_refresh_token(&self, token: RefreshTokenRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, revoked, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.revoked)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, user_id, token_hash, revoked, created_at, expires_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(refresh_token_from_row))
    }

    async fn find_refresh_token_for_user(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, user_id, token_hash, revoked, created_at, expires_at
            FROM refresh_tokens
            WHERE user_id = $1 AND token_hash = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(refresh_token_from_row))
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken by this UPDATE makes a concurrent rotation of the
        // same token wait, then see revoked = true and match nothing.
        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1
            WHERE id = $2 AND revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(old_id)
        .execute(&mut tx)
        .await?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, revoked, created_at, expires_at)
            VALUES ($1, $2, $3, false, $4, $5)
            "#,
        )
        .bind(replacement.id)
        .bind(replacement.user_id)
        .bind(&replacement.token_hash)
        .bind(replacement.created_at)
        .bind(replacement.expires_at)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1
            WHERE id = $2 AND revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1
            WHERE user_id = $2 AND revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_reset_token(&self, token: ResetTokenRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO reset_tokens (id, user_id, token_hash, used, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.used)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_reset_token(&self, token_hash: &str) -> Result<Option<ResetTokenRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, ResetTokenRow>(
            r#"
            SELECT id, user_id, token_hash, used, created_at, expires_at
            FROM reset_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(reset_token_from_row))
    }

    async fn consume_reset_token(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE reset_tokens
            SET used = true, used_at = $1
            WHERE id = $2 AND used = false AND expires_at > $1
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(id)
        .fetch_optional(&mut tx)
        .await?;

        let user_id = match owner {
            Some(user_id) => user_id,
            None => {
                tx.rollback().await?;
                return Ok(false);
            }
        };

        let updated = sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
            .bind(password_hash)
            .bind(now)
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}
