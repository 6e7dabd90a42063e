/// Authentication module
///
/// Access token minting, password hashing, the refresh and reset token
/// engines, and the service that orchestrates them.

mod claims;
mod jwt;
mod password;
mod refresh_token;
mod reset_token;
mod secret;
mod service;

pub use claims::Claims;
pub use jwt::{AccessTokenMinter, MIN_SECRET_LENGTH};
pub use password::{hash_off_thread, verify_off_thread, BcryptHasher, PasswordHasher};
pub use refresh_token::{RefreshTokenEngine, RevokeOutcome};
pub use reset_token::ResetTokenEngine;
pub use secret::{generate_secret, hash_secret, REFRESH_TOKEN_LENGTH, RESET_TOKEN_LENGTH};
pub use service::{
    AuthDependencies, AuthService, RequestContext, TokenPair, TokenPolicy, REUSE_DETECTED, TOKEN_TYPE,
};
