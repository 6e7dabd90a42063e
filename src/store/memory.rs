//! In-process credential store.
//!
//! Arena-style tables keyed by id, with secondary indexes standing in for the
//! unique constraints. A single async mutex serialises every operation, which
//! makes each compound operation atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CredentialStore, LockoutPolicy, NewUser, RefreshTokenRecord, ResetTokenRecord, User};
use crate::error::DatabaseError;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    users_by_email: HashMap<String, Uuid>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    refresh_by_hash: HashMap<String, Uuid>,
    reset_tokens: HashMap<Uuid, ResetTokenRecord>,
    reset_by_hash: HashMap<String, Uuid>,
}

impl Tables {
    fn put_refresh_token(&mut self, token: RefreshTokenRecord) -> Result<(), DatabaseError> {
        if self.refresh_by_hash.contains_key(&token.token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }
        self.refresh_by_hash.insert(token.token_hash.clone(), token.id);
        self.refresh_tokens.insert(token.id, token);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    tables: Mutex<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError> {
        let mut tables = self.tables.lock().await;

        if tables.users_by_email.contains_key(&user.email) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "users_email_key".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            is_active: true,
            failed_attempts: 0,
            locked_until: None,
            created_at: Utc::now(),
        };
        tables.users_by_email.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users_by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn set_user_active(&self, id: Uuid, is_active: bool) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.is_active = is_active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        policy: LockoutPolicy,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let user = match tables.users.get_mut(&id) {
            Some(user) => user,
            None => return Ok(None),
        };

        user.failed_attempts += 1;
        if user.failed_attempts >= policy.max_failed_attempts {
            user.failed_attempts = 0;
            user.locked_until = Some(now + policy.lockout);
        }

        Ok(user.locked_until)
    }

    async fn clear_failed_logins(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get_mut(&id) {
            user.failed_attempts = 0;
            user.locked_until = None;
        }
        Ok(())
    }

    async fn insert_refresh_token(&self, token: RefreshTokenRecord) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        tables.put_refresh_token(token)
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .refresh_by_hash
            .get(token_hash)
            .and_then(|id| tables.refresh_tokens.get(id))
            .cloned())
    }

    async fn find_refresh_token_for_user(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id && t.token_hash == token_hash)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: RefreshTokenRecord,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;

        let still_active = matches!(tables.refresh_tokens.get(&old_id), Some(old) if !old.revoked);
        if !still_active {
            return Ok(false);
        }

        // Insert first so a hash conflict leaves the old token untouched
        tables.put_refresh_token(replacement)?;
        if let Some(old) = tables.refresh_tokens.get_mut(&old_id) {
            old.revoked = true;
        }

        Ok(true)
    }

    async fn revoke_refresh_token(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;
        match tables.refresh_tokens.get_mut(&id) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<u64, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let mut revoked = 0;
        for token in tables
            .refresh_tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn insert_reset_token(&self, token: ResetTokenRecord) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;

        if tables.reset_by_hash.contains_key(&token.token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "reset_tokens_token_hash_key".to_string(),
            ));
        }
        tables.reset_by_hash.insert(token.token_hash.clone(), token.id);
        tables.reset_tokens.insert(token.id, token);

        Ok(())
    }

    async fn find_reset_token(&self, token_hash: &str) -> Result<Option<ResetTokenRecord>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reset_by_hash
            .get(token_hash)
            .and_then(|id| tables.reset_tokens.get(id))
            .cloned())
    }

    async fn consume_reset_token(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;

        let owner = match tables.reset_tokens.get(&id) {
            Some(token) if !token.used && !token.is_expired(now) => token.user_id,
            _ => return Ok(false),
        };

        // Both writes happen under the same lock, or neither does
        match tables.users.get_mut(&owner) {
            Some(user) => user.password_hash = password_hash.to_string(),
            None => return Ok(false),
        }
        if let Some(token) = tables.reset_tokens.get_mut(&id) {
            token.used = true;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: None,
            password_hash: "hash".to_string(),
        }
    }

    fn refresh_record(user_id: Uuid, hash: &str) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash.to_string(),
            revoked: false,
            created_at: now,
            expires_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = InMemoryCredentialStore::new();
        store.insert_user(new_user("a@example.com")).await.unwrap();

        let result = store.insert_user(new_user("a@example.com")).await;
        assert!(matches!(
            result,
            Err(DatabaseError::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_refresh_hash_rejected() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();

        store.insert_refresh_token(refresh_record(user.id, "h1")).await.unwrap();
        let result = store.insert_refresh_token(refresh_record(user.id, "h1")).await;

        assert!(matches!(
            result,
            Err(DatabaseError::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let old = refresh_record(user.id, "old");
        store.insert_refresh_token(old.clone()).await.unwrap();

        assert!(store
            .rotate_refresh_token(old.id, refresh_record(user.id, "new-1"))
            .await
            .unwrap());
        assert!(!store
            .rotate_refresh_token(old.id, refresh_record(user.id, "new-2"))
            .await
            .unwrap());

        // The losing replacement was never stored
        assert!(store.find_refresh_token("new-2").await.unwrap().is_none());
        assert!(store.find_refresh_token("old").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_rotate_hash_conflict_keeps_old_active() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let old = refresh_record(user.id, "old");
        store.insert_refresh_token(old.clone()).await.unwrap();
        store.insert_refresh_token(refresh_record(user.id, "taken")).await.unwrap();

        let result = store
            .rotate_refresh_token(old.id, refresh_record(user.id, "taken"))
            .await;

        assert!(result.is_err());
        assert!(!store.find_refresh_token("old").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_find_refresh_token_is_user_scoped() {
        let store = InMemoryCredentialStore::new();
        let alice = store.insert_user(new_user("alice@example.com")).await.unwrap();
        let bob = store.insert_user(new_user("bob@example.com")).await.unwrap();
        store.insert_refresh_token(refresh_record(alice.id, "h")).await.unwrap();

        assert!(store.find_refresh_token_for_user(alice.id, "h").await.unwrap().is_some());
        assert!(store.find_refresh_token_for_user(bob.id, "h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_reset_token_sets_password_once() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let now = Utc::now();
        let token = ResetTokenRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: "reset".to_string(),
            used: false,
            created_at: now,
            expires_at: now + Duration::minutes(30),
        };
        store.insert_reset_token(token.clone()).await.unwrap();

        assert!(store.consume_reset_token(token.id, "new-hash", now).await.unwrap());
        assert!(!store.consume_reset_token(token.id, "other-hash", now).await.unwrap());

        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash, "new-hash");
    }

    #[tokio::test]
    async fn test_consume_reset_token_rejects_at_expiry() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let now = Utc::now();
        let token = ResetTokenRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: "reset".to_string(),
            used: false,
            created_at: now - Duration::minutes(30),
            expires_at: now,
        };
        store.insert_reset_token(token.clone()).await.unwrap();

        assert!(!store.consume_reset_token(token.id, "new-hash", now).await.unwrap());

        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash, "hash");
    }

    #[tokio::test]
    async fn test_failed_logins_lock_at_threshold() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let now = Utc::now();
        let policy = LockoutPolicy {
            max_failed_attempts: 3,
            lockout: Duration::minutes(15),
        };

        for _ in 0..2 {
            assert_eq!(store.record_failed_login(user.id, now, policy).await.unwrap(), None);
        }
        let locked_until = store.record_failed_login(user.id, now, policy).await.unwrap();
        assert_eq!(locked_until, Some(now + Duration::minutes(15)));

        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
        assert!(user.is_locked(now));

        store.clear_failed_logins(user.id).await.unwrap();
        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert!(!user.is_locked(now));
    }

    #[tokio::test]
    async fn test_update_password_hash() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();

        assert!(store.update_password_hash(user.id, "changed").await.unwrap());
        assert!(!store.update_password_hash(Uuid::new_v4(), "changed").await.unwrap());

        let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.password_hash, "changed");
    }

    #[tokio::test]
    async fn test_revoke_all_counts_only_active() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let first = refresh_record(user.id, "h1");
        store.insert_refresh_token(first.clone()).await.unwrap();
        store.insert_refresh_token(refresh_record(user.id, "h2")).await.unwrap();
        store.revoke_refresh_token(first.id).await.unwrap();

        assert_eq!(store.revoke_all_refresh_tokens(user.id).await.unwrap(), 1);
        assert_eq!(store.revoke_all_refresh_tokens(user.id).await.unwrap(), 0);
    }
}
