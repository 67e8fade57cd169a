//! Session lifecycle.
//!
//! A session is a signed JWT verified statelessly. Alongside it the client
//! gets a refresh token, persisted as a SHA-256 hash, which can be exchanged
//! for a new session. Refresh tokens are rotated on exchange unless rotation
//! is disabled.
//!
//! Every refresh failure (unknown, expired, revoked, replayed) collapses to
//! the same `Unauthorized("invalid refresh token")`.

pub mod jwt;

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::storage::Persister;
use crate::types::{RefreshToken, hash_token};

pub use jwt::{JwtError, JwtService, Jwks, SessionClaims, SigningAlgorithm, SigningKeyPair};

pub(crate) const MISSING_REFRESH_TOKEN: &str = "missing refresh token";
const INVALID_REFRESH_TOKEN: &str = "invalid refresh token";
const INVALID_EXCHANGE_TOKEN: &str = "invalid token";
const INVALID_SESSION_TOKEN: &str = "invalid session token";
const DEFAULT_KEY_ID: &str = "hanko-session";

/// A freshly issued session.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub session_token: String,
    pub expires_at: OffsetDateTime,
    /// New refresh token, if one was issued. `None` when the presented one
    /// stays valid (rotation disabled).
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<OffsetDateTime>,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Issues, validates and renews sessions.
pub struct SessionManager {
    jwt: JwtService,
    persister: Arc<dyn Persister>,
    config: SessionConfig,
    lifespan: time::Duration,
    refresh_lifespan: time::Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("jwt", &self.jwt)
            .field("lifespan", &self.lifespan)
            .field("refresh_lifespan", &self.refresh_lifespan)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Builds the manager, loading or generating the signing key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported algorithm, invalid PEM
    /// data or out-of-range lifespans.
    pub fn from_config(config: &SessionConfig, persister: Arc<dyn Persister>) -> AuthResult<Self> {
        let signing = &config.signing;
        let algorithm: SigningAlgorithm = signing
            .algorithm
            .parse()
            .map_err(|e: JwtError| AuthError::configuration(e.to_string()))?;

        let key_pair = match (&signing.private_key_pem, &signing.public_key_pem) {
            (Some(private_pem), Some(public_pem)) => SigningKeyPair::from_pem(
                signing.key_id.as_deref().unwrap_or(DEFAULT_KEY_ID),
                algorithm,
                private_pem,
                public_pem,
            ),
            _ => {
                tracing::warn!(
                    algorithm = %algorithm,
                    "No session signing key configured, generating an ephemeral key pair; \
                     sessions will not survive a restart"
                );
                if algorithm.is_rsa() {
                    SigningKeyPair::generate_rsa(algorithm)
                } else {
                    SigningKeyPair::generate_ec()
                }
            }
        }
        .map_err(|e| AuthError::configuration(format!("session signing key: {e}")))?;

        let jwt = JwtService::new(key_pair, config.issuer.clone(), config.audience.clone());
        Self::new(jwt, persister, config.clone())
    }

    /// # Errors
    ///
    /// Returns a configuration error if a lifespan does not fit a `time::Duration`.
    pub fn new(jwt: JwtService, persister: Arc<dyn Persister>, config: SessionConfig) -> AuthResult<Self> {
        let lifespan = to_time_duration("session.lifespan", config.lifespan)?;
        let refresh_lifespan = to_time_duration("session.refresh.lifespan", config.refresh.lifespan)?;
        Ok(Self {
            jwt,
            persister,
            config,
            lifespan,
            refresh_lifespan,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Public signing key, for `/.well-known/jwks.json`.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.jwt.jwks()
    }

    /// Starts a new session for `user_id`, with a new refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or storing the refresh token fails.
    pub async fn issue(&self, user_id: Uuid) -> AuthResult<IssuedSession> {
        let session_id = Uuid::new_v4();
        let (refresh_value, refresh) = RefreshToken::generate(user_id, session_id, self.refresh_lifespan);
        self.persister.create_refresh_token(&refresh).await?;

        let mut session = self.sign(user_id, session_id)?;
        session.refresh_token = Some(refresh_value);
        session.refresh_expires_at = Some(refresh.expires_at);
        tracing::debug!(user_id = %user_id, session_id = %session_id, "Session issued");
        Ok(session)
    }

    /// Validates a session token.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the token is malformed, expired or not ours.
    pub fn validate(&self, token: &str) -> AuthResult<SessionClaims> {
        self.jwt
            .decode::<SessionClaims>(token)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Session token rejected");
                AuthError::unauthorized(INVALID_SESSION_TOKEN)
            })
    }

    /// Exchanges a refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized("missing refresh token")` without any lookup when
    /// no token is given, and `Unauthorized("invalid refresh token")` for any
    /// token that cannot be used.
    pub async fn exchange_refresh_token(&self, token: Option<&str>) -> AuthResult<IssuedSession> {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(AuthError::unauthorized(MISSING_REFRESH_TOKEN)),
        };

        let token_hash = hash_token(token);
        let stored = match self.persister.find_refresh_token(&token_hash).await? {
            Some(stored) if stored.is_valid() => stored,
            Some(stored) => {
                tracing::debug!(
                    user_id = %stored.user_id,
                    expired = stored.is_expired(),
                    revoked = stored.is_revoked(),
                    "Refresh token rejected"
                );
                return Err(AuthError::unauthorized(INVALID_REFRESH_TOKEN));
            }
            None => return Err(AuthError::unauthorized(INVALID_REFRESH_TOKEN)),
        };

        let mut session = self.sign(stored.user_id, stored.session_id)?;
        if self.config.refresh.rotation {
            let (value, rotated) =
                RefreshToken::generate(stored.user_id, stored.session_id, self.refresh_lifespan);
            if !self
                .persister
                .rotate_refresh_token(&token_hash, &rotated)
                .await?
            {
                tracing::warn!(user_id = %stored.user_id, "Refresh token was already rotated");
                return Err(AuthError::unauthorized(INVALID_REFRESH_TOKEN));
            }
            session.refresh_token = Some(value);
            session.refresh_expires_at = Some(rotated.expires_at);
        }

        tracing::debug!(user_id = %stored.user_id, session_id = %stored.session_id, "Refresh token exchanged");
        Ok(session)
    }

    /// Redeems a one-time exchange token for a new session.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the token is unknown, expired or already redeemed.
    pub async fn redeem_exchange_token(&self, value: &str) -> AuthResult<IssuedSession> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AuthError::unauthorized(INVALID_EXCHANGE_TOKEN));
        }
        let token = self
            .persister
            .redeem_exchange_token(&hash_token(value))
            .await?
            .ok_or_else(|| AuthError::unauthorized(INVALID_EXCHANGE_TOKEN))?;
        if token.is_expired() {
            tracing::debug!(user_id = %token.user_id, "Expired exchange token presented");
            return Err(AuthError::unauthorized(INVALID_EXCHANGE_TOKEN));
        }
        self.issue(token.user_id).await
    }

    /// Revokes a refresh token, e.g. on logout.
    ///
    /// Returns `false` if the token was unknown or already revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage call fails.
    pub async fn revoke_refresh_token(&self, token: &str) -> AuthResult<bool> {
        if token.trim().is_empty() {
            return Ok(false);
        }
        self.persister
            .revoke_refresh_token(&hash_token(token.trim()))
            .await
    }

    fn sign(&self, user_id: Uuid, session_id: Uuid) -> AuthResult<IssuedSession> {
        let now = OffsetDateTime::now_utc();
        let claims = self.jwt.claims(user_id, session_id, now, self.lifespan);
        let session_token = self
            .jwt
            .encode(&claims)
            .map_err(|e| AuthError::internal(format!("failed to sign session token: {e}")))?;
        Ok(IssuedSession {
            user_id,
            session_id,
            session_token,
            expires_at: now + self.lifespan,
            refresh_token: None,
            refresh_expires_at: None,
        })
    }
}

fn to_time_duration(field: &str, value: std::time::Duration) -> AuthResult<time::Duration> {
    time::Duration::try_from(value)
        .map_err(|e| AuthError::configuration(format!("{field} is out of range: {e}")))
}
