//! Generic OpenID Connect provider.
//!
//! Uses the authorization code flow against explicitly configured endpoints
//! and reads the profile from the userinfo endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{OAuthClient, OAuthProvider, ProviderError, ProviderProfile, ProviderToken};
use crate::AuthResult;
use crate::config::OidcProviderConfig;
use crate::error::AuthError;

/// Endpoints of an OpenID Connect provider.
#[derive(Debug, Clone)]
pub struct OidcEndpoints {
    pub authorization: Url,
    pub token: Url,
    pub userinfo: Url,
}

/// Standard userinfo claims.
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// An OpenID Connect provider.
#[derive(Debug, Clone)]
pub struct OidcProvider {
    name: String,
    client_id: String,
    secret: String,
    redirect_url: Url,
    endpoints: OidcEndpoints,
    scopes: Vec<String>,
    extra_auth_params: Vec<(String, String)>,
    client: OAuthClient,
}

impl OidcProvider {
    /// Creates a provider. `name` is lower-cased.
    #[must_use]
    pub fn new(
        name: &str,
        client_id: impl Into<String>,
        secret: impl Into<String>,
        redirect_url: Url,
        endpoints: OidcEndpoints,
        client: OAuthClient,
    ) -> Self {
        Self {
            name: name.to_lowercase(),
            client_id: client_id.into(),
            secret: secret.into(),
            redirect_url,
            endpoints,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            extra_auth_params: Vec::new(),
            client,
        }
    }

    /// Builds a provider from a `custom_providers` entry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an endpoint does not parse.
    pub fn from_config(
        name: &str,
        config: &OidcProviderConfig,
        redirect_url: Url,
        client: OAuthClient,
    ) -> AuthResult<Self> {
        let endpoint = |field: &str, value: &str| {
            Url::parse(value).map_err(|e| {
                AuthError::configuration(format!(
                    "custom_providers.{name}.{field} is not a valid URL: {e}"
                ))
            })
        };
        let endpoints = OidcEndpoints {
            authorization: endpoint("authorization_endpoint", &config.authorization_endpoint)?,
            token: endpoint("token_endpoint", &config.token_endpoint)?,
            userinfo: endpoint("userinfo_endpoint", &config.userinfo_endpoint)?,
        };
        Ok(Self::new(
            name,
            &config.client_id,
            &config.secret,
            redirect_url,
            endpoints,
            client,
        )
        .with_scopes(config.scopes.clone()))
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    /// Adds a fixed parameter to every authorization URL.
    #[must_use]
    pub fn with_auth_param(mut self, key: &str, value: &str) -> Self {
        self.extra_auth_params
            .push((key.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl OAuthProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.endpoints.authorization.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_url.as_str())
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state);
            for (key, value) in &self.extra_auth_params {
                query.append_pair(key, value);
            }
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        self.client
            .exchange_code(
                &self.endpoints.token,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.redirect_url.as_str()),
                    ("client_id", &self.client_id),
                    ("client_secret", &self.secret),
                ],
            )
            .await
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        let info: UserInfo = self
            .client
            .get_json(&self.endpoints.userinfo, &token.access_token)
            .await?;
        if info.sub.is_empty() {
            return Err(ProviderError::ProfileFetchFailed(
                "userinfo response has an empty sub".to_string(),
            ));
        }
        Ok(ProviderProfile {
            external_id: info.sub,
            email: info.email.filter(|e| !e.is_empty()),
            email_verified: info.email_verified.unwrap_or(false),
            name: info.name,
            picture: info.picture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str) -> OidcProvider {
        let endpoints = OidcEndpoints {
            authorization: Url::parse(&format!("{base}/authorize")).unwrap(),
            token: Url::parse(&format!("{base}/token")).unwrap(),
            userinfo: Url::parse(&format!("{base}/userinfo")).unwrap(),
        };
        OidcProvider::new(
            "Corp",
            "client-1",
            "secret-1",
            Url::parse("https://api.example/thirdparty/callback").unwrap(),
            endpoints,
            OAuthClient::new(Duration::from_secs(2)).unwrap(),
        )
    }

    #[test]
    fn test_authorization_url() {
        let url = provider("https://sso.example").authorization_url("st.sig");
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/authorize");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["redirect_uri"], "https://api.example/thirdparty/callback");
        assert_eq!(pairs["scope"], "openid email profile");
        assert_eq!(pairs["state"], "st.sig");
    }

    #[tokio::test]
    async fn test_code_exchange_and_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("client_secret=secret-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "at", "token_type": "Bearer"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "u-42",
                "email": "jane@corp.example",
                "email_verified": true,
                "name": "Jane"
            })))
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        assert_eq!(provider.name(), "corp");
        let token = provider.exchange_code("code-1").await.unwrap();
        let profile = provider.fetch_profile(&token).await.unwrap();
        assert_eq!(profile.external_id, "u-42");
        assert_eq!(profile.email.as_deref(), Some("jane@corp.example"));
        assert!(profile.email_verified);
        assert_eq!(profile.picture, None);
    }

    #[tokio::test]
    async fn test_missing_email_verified_is_unverified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "u-1",
                "email": "x@corp.example"
            })))
            .mount(&server)
            .await;

        let token = ProviderToken {
            access_token: "at".to_string(),
            id_token: None,
        };
        let profile = provider(&server.uri()).fetch_profile(&token).await.unwrap();
        assert!(!profile.email_verified);
    }
}
