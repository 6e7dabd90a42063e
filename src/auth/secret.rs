/// Token Secret Generation and Hashing
///
/// Refresh and reset tokens are random alphanumeric (URL-safe) strings drawn
/// from a CSPRNG. The server stores only their SHA-256 digest; the plaintext
/// is handed to the client once and never persisted or logged.
///
/// Stored tokens are found by digest, so a presented value either hashes to
/// an indexed row or matches nothing. There is no separate compare step.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

/// 64 alphanumeric characters, ~381 bits of entropy
pub const REFRESH_TOKEN_LENGTH: usize = 64;
/// 48 alphanumeric characters, ~285 bits of entropy
pub const RESET_TOKEN_LENGTH: usize = 48;

/// Generate a random secret of `length` alphanumeric characters.
pub fn generate_secret(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Hash a token secret using SHA-256 (hex encoded).
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
