//! Sign in with Apple.
//!
//! Apple differs from the other providers in three ways:
//!
//! - the callback arrives as a form POST (`response_mode=form_post`)
//! - the client secret is a short-lived ES256 JWT signed with the team key
//! - the profile is read from the ID token, verified against Apple's JWKS

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use url::Url;

use super::{OAuthClient, OAuthProvider, ProviderError, ProviderProfile, ProviderToken};
use crate::AuthResult;
use crate::config::AppleProviderConfig;
use crate::error::AuthError;

const ISSUER: &str = "https://appleid.apple.com";
const AUTHORIZATION_ENDPOINT: &str = "https://appleid.apple.com/auth/authorize";
const TOKEN_ENDPOINT: &str = "https://appleid.apple.com/auth/token";
const JWKS_ENDPOINT: &str = "https://appleid.apple.com/auth/keys";
const CLIENT_SECRET_LIFESPAN: time::Duration = time::Duration::minutes(5);

#[derive(Debug, Serialize, Deserialize)]
struct ClientSecretClaims {
    iss: String,
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AppleIdClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    /// Apple sends either a boolean or the strings `"true"`/`"false"`.
    #[serde(default, deserialize_with = "bool_or_string")]
    email_verified: bool,
}

fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }
    Ok(match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => b,
        BoolOrString::String(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// The Apple provider.
#[derive(Clone)]
pub struct AppleProvider {
    client_id: String,
    team_id: String,
    key_id: String,
    signing_key: EncodingKey,
    redirect_url: Url,
    authorization_endpoint: Url,
    token_endpoint: Url,
    jwks_endpoint: Url,
    client: OAuthClient,
}

impl std::fmt::Debug for AppleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppleProvider")
            .field("client_id", &self.client_id)
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .field("signing_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl AppleProvider {
    /// # Errors
    ///
    /// Returns a configuration error if the private key is not a valid EC PEM.
    pub fn new(config: &AppleProviderConfig, redirect_url: Url, client: OAuthClient) -> AuthResult<Self> {
        let signing_key = EncodingKey::from_ec_pem(config.private_key_pem.as_bytes())
            .map_err(|e| AuthError::configuration(format!("invalid Apple private key: {e}")))?;
        Ok(Self {
            client_id: config.client_id.clone(),
            team_id: config.team_id.clone(),
            key_id: config.key_id.clone(),
            signing_key,
            redirect_url,
            authorization_endpoint: parse(AUTHORIZATION_ENDPOINT)?,
            token_endpoint: parse(TOKEN_ENDPOINT)?,
            jwks_endpoint: parse(JWKS_ENDPOINT)?,
            client,
        })
    }

    /// Points the token and JWKS calls at different endpoints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an endpoint does not parse.
    pub fn with_endpoints(mut self, token: &str, jwks: &str) -> AuthResult<Self> {
        self.token_endpoint = parse(token)?;
        self.jwks_endpoint = parse(jwks)?;
        Ok(self)
    }

    fn client_secret(&self) -> Result<String, ProviderError> {
        let now = OffsetDateTime::now_utc();
        let claims = ClientSecretClaims {
            iss: self.team_id.clone(),
            sub: self.client_id.clone(),
            aud: ISSUER.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + CLIENT_SECRET_LIFESPAN).unix_timestamp(),
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, &claims, &self.signing_key).map_err(|e| {
            ProviderError::CodeExchangeFailed(format!("failed to sign client secret: {e}"))
        })
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<AppleIdClaims, ProviderError> {
        let header = jsonwebtoken::decode_header(id_token)
            .map_err(|e| ProviderError::ProfileFetchFailed(format!("malformed id_token: {e}")))?;
        let kid = header.kid.ok_or_else(|| {
            ProviderError::ProfileFetchFailed("id_token is missing key ID (kid) header".to_string())
        })?;

        let jwks: JwkSet = self.client.get_public_json(&self.jwks_endpoint).await?;
        let jwk = jwks.find(&kid).ok_or_else(|| {
            ProviderError::ProfileFetchFailed(format!("no Apple signing key with kid '{kid}'"))
        })?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| ProviderError::ProfileFetchFailed(format!("invalid Apple key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&[ISSUER]);

        jsonwebtoken::decode::<AppleIdClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| ProviderError::ProfileFetchFailed(format!("id_token rejected: {e}")))
    }
}

fn parse(value: &str) -> AuthResult<Url> {
    Url::parse(value).map_err(|e| AuthError::configuration(format!("invalid Apple endpoint '{value}': {e}")))
}

#[async_trait]
impl OAuthProvider for AppleProvider {
    fn name(&self) -> &str {
        "apple"
    }

    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("response_mode", "form_post")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", "name email")
            .append_pair("state", state);
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let client_secret = self.client_secret()?;
        let token = self
            .client
            .exchange_code(
                &self.token_endpoint,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.redirect_url.as_str()),
                    ("client_id", &self.client_id),
                    ("client_secret", &client_secret),
                ],
            )
            .await?;
        if token.id_token.is_none() {
            return Err(ProviderError::CodeExchangeFailed(
                "token response has no id_token".to_string(),
            ));
        }
        Ok(token)
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        let id_token = token.id_token.as_deref().ok_or_else(|| {
            ProviderError::ProfileFetchFailed("missing id_token".to_string())
        })?;
        let claims = self.verify_id_token(id_token).await?;
        Ok(ProviderProfile {
            external_id: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
            name: None,
            picture: None,
        })
    }
}
