/// Access Token Minter
///
/// Signs short-lived HS256 bearer tokens. The signing secret is loaded once
/// at startup and injected here; a missing or short secret is a startup
/// failure, not a per-call error.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};
use crate::store::User;

pub const MIN_SECRET_LENGTH: usize = 32;

pub struct AccessTokenMinter {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    default_ttl: Duration,
}

impl AccessTokenMinter {
    /// # Errors
    /// Returns `ConfigError` when the secret is shorter than 32 bytes, the
    /// issuer is empty, or the default lifetime is not positive.
    pub fn new(config: &JwtSettings) -> Result<Self, ConfigError> {
        if config.secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        if config.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if config.issuer.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.issuer".to_string()));
        }
        if config.access_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt.access_token_expiry must be positive".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            default_ttl: Duration::seconds(config.access_token_expiry),
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Sign `claims` plus `exp = now + ttl`, `iat` and `iss`. Those three are
    /// always set here and override any caller-supplied value.
    pub fn mint(&self, mut claims: Map<String, Value>, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        claims.insert("exp".to_string(), Value::from(now + ttl.num_seconds()));
        claims.insert("iat".to_string(), Value::from(now));
        claims.insert("iss".to_string(), Value::from(self.issuer.clone()));

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Mint a token for `user` with the default lifetime.
    pub fn mint_for_user(&self, user: &User) -> Result<String, AppError> {
        let mut claims = Map::new();
        claims.insert("sub".to_string(), Value::from(user.id.to_string()));
        claims.insert("email".to_string(), Value::from(user.email.clone()));

        self.mint(claims, self.default_ttl)
    }

    /// Validate signature, issuer and expiry (no leeway).
    ///
    /// # Errors
    /// Returns error if token is invalid, expired, or tampered with
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!("JWT validation error: {}", e);
                AppError::Auth(AuthError::AccessTokenInvalid)
            })
    }
}
