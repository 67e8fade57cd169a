//! Signed, time-bounded flow state for the third-party authorization flow.
//!
//! A [`FlowState`] binds an authorization attempt to the browser that started
//! it. It is never stored server-side: the encoded value is placed both in the
//! provider's `state` parameter and in an HttpOnly cookie, and the callback
//! must present two copies that verify and carry the same nonce.
//!
//! # Encoding
//!
//! ```text
//! base64url(json(FlowState)) "." base64url(HMAC-SHA256(key, first part))
//! ```
//!
//! The first configured secret key signs; every configured key is accepted on
//! verification so keys can be rotated without breaking in-flight logins.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};

use crate::AuthResult;
use crate::error::AuthError;
use crate::redirect::RedirectKind;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a flow state and of the cookie that carries it.
pub const STATE_LIFESPAN: Duration = Duration::seconds(300);

/// Number of random bytes in a nonce.
pub const NONCE_LEN: usize = 32;

/// Errors raised while verifying a flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The value is malformed or its signature does not verify.
    #[error("invalid state")]
    Invalid,

    /// The state is past its expiry.
    #[error("state expired")]
    Expired,

    /// The query state and the cookie state belong to different flows.
    #[error("state nonce mismatch")]
    NonceMismatch,
}

/// Decoded flow state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    /// Provider name as resolved at authorize time.
    pub provider: String,
    /// Target the user agent returns to after the callback.
    pub redirect_to: String,
    /// Base64url-encoded random nonce.
    pub nonce: String,
    #[serde(with = "time::serde::timestamp")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

impl FlowState {
    /// Returns `true` if the state is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// How the user agent must be sent to `redirect_to`.
    #[must_use]
    pub fn redirect_kind(&self) -> RedirectKind {
        RedirectKind::for_target(&self.redirect_to)
    }
}

/// A freshly issued state.
#[derive(Debug, Clone)]
pub struct IssuedState {
    /// The opaque value for the query parameter and the cookie.
    pub value: String,
    /// The nonce embedded in `value`.
    pub nonce: String,
    pub state: FlowState,
}

/// Issues and verifies flow states.
#[derive(Clone)]
pub struct StateCodec {
    keys: Vec<Vec<u8>>,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl StateCodec {
    /// Creates a codec from the configured secret keys.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no key is given.
    pub fn new<S: AsRef<str>>(keys: &[S]) -> AuthResult<Self> {
        if keys.is_empty() {
            return Err(AuthError::configuration(
                "at least one secret key is required to sign flow state",
            ));
        }
        Ok(Self {
            keys: keys.iter().map(|k| k.as_ref().as_bytes().to_vec()).collect(),
        })
    }

    /// Issues a new state for `provider` and `redirect_to`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state cannot be serialized or signed.
    pub fn issue(&self, provider: &str, redirect_to: &str) -> AuthResult<IssuedState> {
        self.issue_at(provider, redirect_to, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        provider: &str,
        redirect_to: &str,
        now: OffsetDateTime,
    ) -> AuthResult<IssuedState> {
        let state = FlowState {
            provider: provider.to_string(),
            redirect_to: redirect_to.to_string(),
            nonce: generate_nonce(),
            issued_at: now,
            expires_at: now + STATE_LIFESPAN,
        };
        let value = self.encode(&state)?;
        Ok(IssuedState {
            value,
            nonce: state.nonce.clone(),
            state,
        })
    }

    fn encode(&self, state: &FlowState) -> AuthResult<String> {
        let json = serde_json::to_vec(state)
            .map_err(|e| AuthError::internal(format!("could not serialize state: {e}")))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signing_key = self
            .keys
            .first()
            .ok_or_else(|| AuthError::configuration("no signing key"))?;
        let mut mac = HmacSha256::new_from_slice(signing_key)
            .map_err(|e| AuthError::internal(format!("could not sign state: {e}")))?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Decodes a single state value, checking signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Invalid` for malformed or tampered values and
    /// `StateError::Expired` for values past their expiry.
    pub fn decode(&self, value: &str) -> Result<FlowState, StateError> {
        self.decode_at(value, OffsetDateTime::now_utc())
    }

    pub(crate) fn decode_at(
        &self,
        value: &str,
        now: OffsetDateTime,
    ) -> Result<FlowState, StateError> {
        let state = self.decode_unchecked(value)?;
        if state.is_expired_at(now) {
            return Err(StateError::Expired);
        }
        Ok(state)
    }

    /// Decodes and authenticates a value without checking expiry.
    fn decode_unchecked(&self, value: &str) -> Result<FlowState, StateError> {
        let (payload, signature) = value.split_once('.').ok_or(StateError::Invalid)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StateError::Invalid)?;

        let authentic = self.keys.iter().any(|key| {
            HmacSha256::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(payload.as_bytes());
                    mac.verify_slice(&signature).is_ok()
                })
                .unwrap_or(false)
        });
        if !authentic {
            return Err(StateError::Invalid);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| StateError::Invalid)?;
        serde_json::from_slice(&json).map_err(|_| StateError::Invalid)
    }

    /// Verifies the query-parameter state against the cookie state.
    ///
    /// Both values must verify and be unexpired, and their nonces must match.
    /// The returned state is the one from the query parameter.
    ///
    /// # Errors
    ///
    /// Returns the first [`StateError`] encountered.
    pub fn verify(&self, query_state: &str, cookie_state: &str) -> Result<FlowState, StateError> {
        self.verify_at(query_state, cookie_state, OffsetDateTime::now_utc())
    }

    pub(crate) fn verify_at(
        &self,
        query_state: &str,
        cookie_state: &str,
        now: OffsetDateTime,
    ) -> Result<FlowState, StateError> {
        let presented = self.decode_unchecked(query_state)?;
        let expected = self.decode_unchecked(cookie_state)?;

        if presented.is_expired_at(now) || expected.is_expired_at(now) {
            return Err(StateError::Expired);
        }
        if presented.nonce != expected.nonce {
            return Err(StateError::NonceMismatch);
        }
        Ok(presented)
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> StateCodec {
        StateCodec::new(&["test-secret-key-0123456789"]).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = codec();
        let issued = codec.issue("google", "https://app.example/cb").unwrap();

        let state = codec.verify(&issued.value, &issued.value).unwrap();
        assert_eq!(state.provider, "google");
        assert_eq!(state.redirect_to, "https://app.example/cb");
        assert_eq!(state.nonce, issued.nonce);
        assert_eq!(state.expires_at - state.issued_at, STATE_LIFESPAN);
    }

    #[test]
    fn test_nonce_is_random_and_long_enough() {
        let codec = codec();
        let a = codec.issue("google", "https://app.example/cb").unwrap();
        let b = codec.issue("google", "https://app.example/cb").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert!(URL_SAFE_NO_PAD.decode(&a.nonce).unwrap().len() >= 16);
    }

    #[test]
    fn test_tampered_payload_is_invalid() {
        let codec = codec();
        let issued = codec.issue("google", "https://app.example/cb").unwrap();
        let (_, signature) = issued.value.split_once('.').unwrap();

        let mut forged = issued.state.clone();
        forged.redirect_to = "https://evil.example".to_string();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_value = format!("{forged_payload}.{signature}");

        assert_eq!(codec.decode(&forged_value), Err(StateError::Invalid));
        assert_eq!(
            codec.verify(&forged_value, &issued.value),
            Err(StateError::Invalid)
        );
        assert_eq!(
            codec.verify(&issued.value, &forged_value),
            Err(StateError::Invalid)
        );
    }

    #[test]
    fn test_garbage_is_invalid() {
        let codec = codec();
        for value in ["", "no-dot", "a.b", "%%%.%%%", "e30.e30"] {
            assert_eq!(codec.decode(value), Err(StateError::Invalid), "{value}");
        }
    }

    #[test]
    fn test_other_key_is_invalid() {
        let issued = codec().issue("google", "https://app.example/cb").unwrap();
        let other = StateCodec::new(&["another-secret-key-987654321"]).unwrap();
        assert_eq!(other.decode(&issued.value), Err(StateError::Invalid));
    }

    #[test]
    fn test_rotated_key_still_verifies() {
        let old = StateCodec::new(&["old-secret-key-0123456789"]).unwrap();
        let issued = old.issue("github", "https://app.example/cb").unwrap();

        let rotated =
            StateCodec::new(&["new-secret-key-0123456789", "old-secret-key-0123456789"]).unwrap();
        assert!(rotated.verify(&issued.value, &issued.value).is_ok());
    }

    #[test]
    fn test_expired_state() {
        let codec = codec();
        let past = OffsetDateTime::now_utc() - Duration::seconds(301);
        let issued = codec
            .issue_at("google", "https://app.example/cb", past)
            .unwrap();

        assert_eq!(codec.decode(&issued.value), Err(StateError::Expired));
        assert_eq!(
            codec.verify(&issued.value, &issued.value),
            Err(StateError::Expired)
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let codec = codec();
        // Timestamps are encoded with second precision.
        let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
        let issued = codec
            .issue_at("google", "https://app.example/cb", now)
            .unwrap();

        assert!(
            codec
                .decode_at(&issued.value, now + STATE_LIFESPAN)
                .is_ok()
        );
        assert_eq!(
            codec.decode_at(&issued.value, now + STATE_LIFESPAN + Duration::seconds(1)),
            Err(StateError::Expired)
        );
    }

    #[test]
    fn test_nonce_mismatch() {
        let codec = codec();
        let first = codec.issue("google", "https://app.example/cb").unwrap();
        let second = codec.issue("google", "https://app.example/cb").unwrap();

        assert_eq!(
            codec.verify(&first.value, &second.value),
            Err(StateError::NonceMismatch)
        );
    }

    #[test]
    fn test_expired_cookie_state() {
        let codec = codec();
        let now = OffsetDateTime::now_utc();
        let cookie = codec
            .issue_at("google", "https://app.example/cb", now - Duration::seconds(400))
            .unwrap();
        let query = codec.issue_at("google", "https://app.example/cb", now).unwrap();

        assert_eq!(
            codec.verify_at(&query.value, &cookie.value, now),
            Err(StateError::Expired)
        );
    }

    #[test]
    fn test_requires_a_key() {
        let keys: [&str; 0] = [];
        assert!(StateCodec::new(&keys).is_err());
    }

    #[test]
    fn test_redirect_kind() {
        let codec = codec();
        let web = codec.issue("google", "https://app.example/cb").unwrap();
        assert_eq!(web.state.redirect_kind(), RedirectKind::Browser);

        let native = codec.issue("google", "myapp://login").unwrap();
        assert_eq!(native.state.redirect_kind(), RedirectKind::NativeDeepLink);
    }
}
