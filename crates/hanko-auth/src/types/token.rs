//! Token domain types.
//!
//! Exchange tokens and refresh tokens are bearer secrets. Only their SHA-256
//! hashes are persisted; the plaintext is handed to the client once.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// How long an exchange token may be redeemed after it is minted.
pub const EXCHANGE_TOKEN_LIFESPAN: Duration = Duration::minutes(1);

/// Hash a token value using SHA-256.
///
/// Used both when storing new tokens and when looking them up.
#[must_use]
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a cryptographically secure random token.
///
/// Returns a 256-bit random value encoded as base64url (43 characters).
#[must_use]
pub fn generate_token() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Single-use token handed to the client on a successful third-party
/// callback and redeemed for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeToken {
    pub id: Uuid,

    /// SHA-256 hash of the plaintext value.
    pub token_hash: String,

    pub user_id: Uuid,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl ExchangeToken {
    /// Mints a new exchange token for `user_id`.
    ///
    /// Returns the plaintext value together with the record to persist.
    #[must_use]
    pub fn generate(user_id: Uuid) -> (String, Self) {
        let value = generate_token();
        let now = OffsetDateTime::now_utc();
        let token = Self {
            id: Uuid::new_v4(),
            token_hash: hash_token(&value),
            user_id,
            created_at: now,
            expires_at: now + EXCHANGE_TOKEN_LIFESPAN,
        };
        (value, token)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}

/// Refresh token stored in the database.
///
/// The token itself is never stored. When validating a refresh token:
///
/// 1. Hash the incoming token
/// 2. Look up by hash
/// 3. Validate expiration and revocation status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Unique identifier for this refresh token record.
    pub id: Uuid,

    /// SHA-256 hash of the actual token value.
    pub token_hash: String,

    pub user_id: Uuid,

    /// Session ID shared with the session tokens issued alongside it.
    pub session_id: Uuid,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When this token was revoked (None = not revoked).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
}

impl RefreshToken {
    /// Mints a new refresh token valid for `lifespan`.
    ///
    /// Returns the plaintext value together with the record to persist.
    #[must_use]
    pub fn generate(user_id: Uuid, session_id: Uuid, lifespan: Duration) -> (String, Self) {
        let value = generate_token();
        let now = OffsetDateTime::now_utc();
        let token = Self {
            id: Uuid::new_v4(),
            token_hash: hash_token(&value),
            user_id,
            session_id,
            created_at: now,
            expires_at: now + lifespan,
            revoked_at: None,
        };
        (value, token)
    }

    /// Returns `true` if this token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Returns `true` if this token has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Returns `true` if this token is valid (not expired and not revoked).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && !self.is_revoked()
    }
}
