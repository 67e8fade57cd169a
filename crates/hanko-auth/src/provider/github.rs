//! GitHub sign-in.
//!
//! GitHub is plain OAuth 2.0: the profile comes from `GET /user` and the email
//! addresses, with their verification status, from `GET /user/emails`.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{OAuthClient, OAuthProvider, ProviderError, ProviderProfile, ProviderToken};
use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;

const AUTHORIZATION_ENDPOINT: &str = "https://github.com/login/oauth/authorize";
const TOKEN_ENDPOINT: &str = "https://github.com/login/oauth/access_token";
const API_BASE: &str = "https://api.github.com";
const SCOPES: &str = "read:user user:email";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

/// The GitHub provider.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    client_id: String,
    secret: String,
    redirect_url: Url,
    authorization_endpoint: Url,
    token_endpoint: Url,
    api_base: Url,
    client: OAuthClient,
}

impl GitHubProvider {
    /// # Errors
    ///
    /// Returns a configuration error if a built-in endpoint fails to parse.
    pub fn new(config: &ProviderConfig, redirect_url: Url, client: OAuthClient) -> AuthResult<Self> {
        Ok(Self {
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
            redirect_url,
            authorization_endpoint: parse(AUTHORIZATION_ENDPOINT)?,
            token_endpoint: parse(TOKEN_ENDPOINT)?,
            api_base: parse(API_BASE)?,
            client,
        })
    }

    /// Points the provider at different endpoints, e.g. GitHub Enterprise.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an endpoint does not parse.
    pub fn with_endpoints(mut self, authorization: &str, token: &str, api_base: &str) -> AuthResult<Self> {
        self.authorization_endpoint = parse(authorization)?;
        self.token_endpoint = parse(token)?;
        self.api_base = parse(api_base)?;
        Ok(self)
    }

    fn api_url(&self, path: &str) -> Result<Url, ProviderError> {
        let base = self.api_base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| ProviderError::ProfileFetchFailed(format!("invalid GitHub API url: {e}")))
    }
}

fn parse(value: &str) -> AuthResult<Url> {
    Url::parse(value).map_err(|e| AuthError::configuration(format!("invalid GitHub endpoint '{value}': {e}")))
}

/// Picks the primary verified address, then any verified one, then the
/// unverified primary.
fn select_email(emails: Vec<GitHubEmail>) -> Option<GitHubEmail> {
    let mut primary_verified = None;
    let mut verified = None;
    let mut primary = None;
    for email in emails {
        match (email.primary, email.verified) {
            (true, true) => primary_verified = Some(email),
            (false, true) if verified.is_none() => verified = Some(email),
            (true, false) => primary = Some(email),
            _ => {}
        }
    }
    primary_verified.or(verified).or(primary)
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("state", state);
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        self.client
            .exchange_code(
                &self.token_endpoint,
                &[
                    ("code", code),
                    ("redirect_uri", self.redirect_url.as_str()),
                    ("client_id", &self.client_id),
                    ("client_secret", &self.secret),
                ],
            )
            .await
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        let user: GitHubUser = self
            .client
            .get_json(&self.api_url("/user")?, &token.access_token)
            .await?;
        let emails: Vec<GitHubEmail> = self
            .client
            .get_json(&self.api_url("/user/emails")?, &token.access_token)
            .await?;
        let email = select_email(emails);

        Ok(ProviderProfile {
            external_id: user.id.to_string(),
            email_verified: email.as_ref().is_some_and(|e| e.verified),
            email: email.map(|e| e.email),
            name: user.name.or(user.login),
            picture: user.avatar_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn email(address: &str, primary: bool, verified: bool) -> GitHubEmail {
        GitHubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn test_select_email_prefers_primary_verified() {
        let selected = select_email(vec![
            email("a@x.io", false, true),
            email("b@x.io", true, true),
        ])
        .unwrap();
        assert_eq!(selected.email, "b@x.io");

        let selected = select_email(vec![
            email("a@x.io", true, false),
            email("b@x.io", false, true),
        ])
        .unwrap();
        assert_eq!(selected.email, "b@x.io");

        let selected = select_email(vec![email("a@x.io", true, false)]).unwrap();
        assert!(!selected.verified);

        assert!(select_email(vec![email("a@x.io", false, false)]).is_none());
    }

    #[tokio::test]
    async fn test_fetch_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1234,
                "login": "octocat",
                "name": null,
                "avatar_url": "https://avatars.example/1234"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/emails"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"email": "octo@github.example", "primary": true, "verified": true}
            ])))
            .mount(&server)
            .await;

        let config = ProviderConfig {
            enabled: true,
            client_id: "gh".to_string(),
            secret: "gh-secret".to_string(),
        };
        let provider = GitHubProvider::new(
            &config,
            Url::parse("https://api.example/thirdparty/callback").unwrap(),
            OAuthClient::new(Duration::from_secs(2)).unwrap(),
        )
        .unwrap()
        .with_endpoints(
            &format!("{}/authorize", server.uri()),
            &format!("{}/token", server.uri()),
            &server.uri(),
        )
        .unwrap();

        let token = ProviderToken {
            access_token: "gho_x".to_string(),
            id_token: None,
        };
        let profile = provider.fetch_profile(&token).await.unwrap();
        assert_eq!(profile.external_id, "1234");
        assert_eq!(profile.email.as_deref(), Some("octo@github.example"));
        assert!(profile.email_verified);
        assert_eq!(profile.name.as_deref(), Some("octocat"));
    }
}
