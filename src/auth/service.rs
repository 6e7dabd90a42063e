/// Authentication Service
///
/// Orchestrates register, login, logout, refresh, forgot-password,
/// reset-password and change-password over the credential store, the token engines, the access
/// token minter, the audit sink and the email sender.
///
/// Every outcome goes to the audit sink with its precise reason. What the
/// caller sees is collapsed by the error layer.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::auth::jwt::AccessTokenMinter;
use crate::auth::password::{hash_off_thread, verify_off_thread, PasswordHasher};
use crate::auth::refresh_token::{RefreshTokenEngine, RevokeOutcome};
use crate::auth::reset_token::ResetTokenEngine;
use crate::configuration::Settings;
use crate::email_client::{reset_email_body, reset_link, EmailSender, RESET_EMAIL_SUBJECT};
use crate::error::{
    AppError, AuthError, ConfigError, CredentialFailure, DatabaseError, TokenError,
};
use crate::store::{CredentialStore, LockoutPolicy, NewUser, User};
use crate::validators::{is_valid_email, is_valid_name, normalize_email, validate_password_strength};

pub const TOKEN_TYPE: &str = "Bearer";
pub const REUSE_DETECTED: &str = "refresh token reuse detected";

/// Verified against when the email is unknown, so a miss costs one hash check
/// like a hit does.
const DUMMY_PASSWORD: &str = "dummy-password-for-timing";

/// Per-request facts recorded alongside audit events.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_addr: Option<String>,
}

impl RequestContext {
    pub fn new(client_addr: Option<String>) -> Self {
        Self { client_addr }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Lifetimes and links for the refresh and reset tokens, and the
/// failed-login lockout.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
    pub reset_link_base_url: String,
    pub lockout: LockoutPolicy,
}

impl TokenPolicy {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        if settings.jwt.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_expiry must be positive".to_string(),
            ));
        }
        if settings.password_reset.token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "password_reset.token_expiry must be positive".to_string(),
            ));
        }
        if settings.lockout.max_failed_attempts <= 0 || settings.lockout.lockout_seconds <= 0 {
            return Err(ConfigError::InvalidValue(
                "lockout.max_failed_attempts and lockout.lockout_seconds must be positive".to_string(),
            ));
        }

        Ok(Self {
            refresh_ttl: Duration::seconds(settings.jwt.refresh_token_expiry),
            reset_ttl: Duration::seconds(settings.password_reset.token_expiry),
            reset_link_base_url: settings.password_reset.link_base_url.clone(),
            lockout: LockoutPolicy {
                max_failed_attempts: settings.lockout.max_failed_attempts,
                lockout: Duration::seconds(settings.lockout.lockout_seconds),
            },
        })
    }
}

pub struct AuthDependencies {
    pub store: Arc<dyn CredentialStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub minter: Arc<AccessTokenMinter>,
    pub audit: Arc<dyn AuditSink>,
    pub email: Arc<dyn EmailSender>,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    minter: Arc<AccessTokenMinter>,
    refresh_tokens: RefreshTokenEngine,
    reset_tokens: ResetTokenEngine,
    audit: Arc<dyn AuditSink>,
    email: Arc<dyn EmailSender>,
    reset_link_base_url: String,
    lockout: LockoutPolicy,
    dummy_hash: String,
}

impl AuthService {
    pub fn new(deps: AuthDependencies, policy: TokenPolicy) -> Result<Self, AppError> {
        let dummy_hash = deps.hasher.hash(DUMMY_PASSWORD)?;

        Ok(Self {
            refresh_tokens: RefreshTokenEngine::new(deps.store.clone(), policy.refresh_ttl),
            reset_tokens: ResetTokenEngine::new(
                deps.store.clone(),
                deps.hasher.clone(),
                policy.reset_ttl,
            ),
            store: deps.store,
            hasher: deps.hasher,
            minter: deps.minter,
            audit: deps.audit,
            email: deps.email,
            reset_link_base_url: policy.reset_link_base_url,
            lockout: policy.lockout,
            dummy_hash,
        })
    }

    pub fn minter(&self) -> Arc<AccessTokenMinter> {
        self.minter.clone()
    }

    fn record(&self, ctx: &RequestContext, event: AuditEvent) {
        self.audit.record(event.with_client_addr(ctx.client_addr.clone()));
    }

    fn fail<T>(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        user_id: Option<Uuid>,
        err: AppError,
    ) -> Result<T, AppError> {
        self.record(ctx, AuditEvent::failure(action, user_id, err.audit_detail()));
        Err(err)
    }

    fn finish<T>(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        user_id: Option<Uuid>,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.record(ctx, AuditEvent::success(action, user_id));
                Ok(value)
            }
            Err(err) => self.fail(ctx, action, user_id, err),
        }
    }

    async fn issue_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        let access_token = self.minter.mint_for_user(user)?;
        let refresh_token = self.refresh_tokens.issue(user.id).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.minter.default_ttl().num_seconds(),
        })
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, AppError> {
        let email = is_valid_email(email)?;
        validate_password_strength(password)?;
        let name = name.map(is_valid_name).transpose()?;
        let password_hash = hash_off_thread(self.hasher.clone(), password).await?;

        self.store
            .insert_user(NewUser {
                email,
                name,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::UniqueConstraintViolation(_) => AppError::Auth(AuthError::DuplicateEmail),
                other => AppError::Database(other),
            })
    }

    /// Create a user. The email is normalised before the uniqueness check.
    pub async fn register(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, AppError> {
        let result = self.create_user(email, password, name).await;
        let user_id = result.as_ref().ok().map(|user| user.id);

        if let Ok(user) = &result {
            tracing::info!(user_id = %user.id, "User registered successfully");
        }
        self.finish(ctx, AuditAction::Register, user_id, result)
    }

    /// Count a wrong password against the lockout threshold.
    async fn note_failed_login(&self, user_id: Uuid) {
        match self.store.record_failed_login(user_id, Utc::now(), self.lockout).await {
            Ok(Some(until)) if until > Utc::now() => {
                tracing::warn!(user_id = %user_id, locked_until = %until, "Account locked after repeated failed logins");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to record failed login");
            }
        }
    }

    /// Check credentials and issue an access/refresh pair.
    ///
    /// Unknown email and wrong password fail the same way. A temporarily
    /// locked account is refused before the password is checked. An inactive
    /// account is reported only once the password has been proven.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, AppError> {
        let action = AuditAction::Login;
        let email = normalize_email(email);

        let user = match self.store.find_user_by_email(&email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let _ = verify_off_thread(self.hasher.clone(), &self.dummy_hash, password).await;
                let err = AuthError::InvalidCredentials(CredentialFailure::UserNotFound);
                return self.fail(ctx, action, None, err.into());
            }
            Err(e) => return self.fail(ctx, action, None, e.into()),
        };

        if user.is_locked(Utc::now()) {
            return self.fail(ctx, action, Some(user.id), AuthError::AccountLocked.into());
        }

        if !verify_off_thread(self.hasher.clone(), &user.password_hash, password).await {
            self.note_failed_login(user.id).await;
            let err = AuthError::InvalidCredentials(CredentialFailure::BadPassword);
            return self.fail(ctx, action, Some(user.id), err.into());
        }

        if !user.is_active {
            return self.fail(ctx, action, Some(user.id), AuthError::AccountLocked.into());
        }

        if user.failed_attempts > 0 || user.locked_until.is_some() {
            if let Err(e) = self.store.clear_failed_logins(user.id).await {
                tracing::error!(user_id = %user.id, error = %e, "Failed to clear failed logins");
            }
        }

        let result = self.issue_pair(&user).await;
        if result.is_ok() {
            tracing::info!(user_id = %user.id, "User logged in successfully");
        }
        self.finish(ctx, action, Some(user.id), result)
    }

    /// Revoke the presented refresh token.
    pub async fn logout(&self, ctx: &RequestContext, refresh_token: &str) -> Result<(), AppError> {
        let action = AuditAction::Logout;

        match self.refresh_tokens.revoke(refresh_token).await {
            Ok(RevokeOutcome::Revoked { user_id }) => {
                self.record(ctx, AuditEvent::success(action, Some(user_id)));
                Ok(())
            }
            Ok(RevokeOutcome::AlreadyRevoked { user_id }) => {
                let err = AuthError::RefreshRejected(TokenError::Revoked);
                self.fail(ctx, action, Some(user_id), err.into())
            }
            Ok(RevokeOutcome::Unknown) => {
                let err = AuthError::RefreshRejected(TokenError::NotFound);
                self.fail(ctx, action, None, err.into())
            }
            Err(e) => self.fail(ctx, action, None, e),
        }
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// revoked; presenting it again fails.
    pub async fn refresh(&self, ctx: &RequestContext, refresh_token: &str) -> Result<TokenPair, AppError> {
        let action = AuditAction::Refresh;

        let user_id = match self.refresh_tokens.owner_of(refresh_token).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                let err = AuthError::RefreshRejected(TokenError::NotFound);
                return self.fail(ctx, action, None, err.into());
            }
            Err(e) => return self.fail(ctx, action, None, e),
        };

        let user = match self.store.find_user_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let err = AuthError::RefreshRejected(TokenError::NotFound);
                return self.fail(ctx, action, Some(user_id), err.into());
            }
            Err(e) => return self.fail(ctx, action, Some(user_id), e.into()),
        };

        if !user.is_active {
            return self.fail(ctx, action, Some(user_id), AuthError::AccountLocked.into());
        }

        let refresh_token = match self.refresh_tokens.verify_and_rotate(user_id, refresh_token).await {
            Ok(token) => token,
            Err(AppError::Auth(AuthError::RefreshRejected(TokenError::Revoked))) => {
                tracing::warn!(user_id = %user_id, "Revoked refresh token presented again");
                self.record(ctx, AuditEvent::failure(action, Some(user_id), REUSE_DETECTED));
                return Err(AuthError::RefreshRejected(TokenError::Revoked).into());
            }
            Err(e) => return self.fail(ctx, action, Some(user_id), e),
        };

        let result = self.minter.mint_for_user(&user).map(|access_token| TokenPair {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.minter.default_ttl().num_seconds(),
        });
        self.finish(ctx, action, Some(user_id), result)
    }

    /// Start a password reset. Never fails and never reveals whether the
    /// email belongs to an account; the precise outcome is only audited.
    ///
    /// The reset email is sent on a background task, so the call returns
    /// after the same store work whether or not a message goes out. The
    /// delivery outcome is audited when the task finishes.
    pub async fn forgot_password(&self, ctx: &RequestContext, email: &str) {
        let action = AuditAction::ForgotPassword;

        let email = match is_valid_email(email) {
            Ok(email) => email,
            Err(e) => {
                let _ = self.fail::<()>(ctx, action, None, e.into());
                return;
            }
        };

        let user = match self.store.find_user_by_email(&email).await {
            Ok(Some(user)) if user.is_active => user,
            Ok(Some(user)) => {
                let _ = self.fail::<()>(ctx, action, Some(user.id), AuthError::AccountLocked.into());
                return;
            }
            Ok(None) => {
                let err = AuthError::InvalidCredentials(CredentialFailure::UserNotFound);
                let _ = self.fail::<()>(ctx, action, None, err.into());
                return;
            }
            Err(e) => {
                let _ = self.fail::<()>(ctx, action, None, e.into());
                return;
            }
        };

        let token = match self.reset_tokens.issue(&user).await {
            Ok(token) => token,
            Err(e) => {
                let _ = self.fail::<()>(ctx, action, Some(user.id), e);
                return;
            }
        };

        let link = reset_link(&self.reset_link_base_url, &token);
        let body = reset_email_body(&link, self.reset_tokens.ttl());
        let email = self.email.clone();
        let audit = self.audit.clone();
        let recipient = user.email;
        let user_id = user.id;
        let client_addr = ctx.client_addr.clone();

        tokio::spawn(async move {
            let event = match email.send_email(&recipient, RESET_EMAIL_SUBJECT, &body).await {
                Ok(()) => AuditEvent::success(action, Some(user_id)),
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to send password reset email");
                    AuditEvent::failure(action, Some(user_id), AppError::from(e).audit_detail())
                }
            };
            audit.record(event.with_client_addr(client_addr));
        });
    }

    /// Consume a reset token and set a new password. Every token failure looks
    /// the same to the caller. On success all refresh tokens of the user are
    /// revoked.
    pub async fn reset_password(
        &self,
        ctx: &RequestContext,
        token: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let action = AuditAction::ResetPassword;

        if let Err(e) = validate_password_strength(new_password) {
            return self.fail(ctx, action, None, e.into());
        }

        let user_id = match self.reset_tokens.consume(token, new_password).await {
            Ok(user_id) => user_id,
            Err(e) => return self.fail(ctx, action, None, e),
        };

        if let Err(e) = self.refresh_tokens.revoke_all(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to revoke sessions after password reset");
        }

        tracing::info!(user_id = %user_id, "Password reset completed");
        self.record(ctx, AuditEvent::success(action, Some(user_id)));
        Ok(())
    }

    /// Replace the password of a signed-in user after proving the current
    /// one. All refresh tokens of the user are revoked.
    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let action = AuditAction::ChangePassword;
        let result = self.replace_password(user_id, current_password, new_password).await;

        if result.is_ok() {
            if let Err(e) = self.refresh_tokens.revoke_all(user_id).await {
                tracing::error!(user_id = %user_id, error = %e, "Failed to revoke sessions after password change");
            }
            tracing::info!(user_id = %user_id, "Password changed");
        }
        self.finish(ctx, action, Some(user_id), result)
    }

    async fn replace_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let user = self.current_user(user_id).await?;

        if !verify_off_thread(self.hasher.clone(), &user.password_hash, current_password).await {
            return Err(AuthError::InvalidCredentials(CredentialFailure::BadPassword).into());
        }
        validate_password_strength(new_password)?;

        let password_hash = hash_off_thread(self.hasher.clone(), new_password).await?;
        if !self.store.update_password_hash(user_id, &password_hash).await? {
            return Err(AuthError::AccessTokenInvalid.into());
        }
        Ok(())
    }

    /// Load the active user behind a verified access token.
    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AppError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::AccessTokenInvalid))?;

        if !user.is_active {
            return Err(AuthError::AccountLocked.into());
        }
        Ok(user)
    }
}
