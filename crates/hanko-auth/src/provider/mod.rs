//! Third-party OAuth providers.
//!
//! Every provider implements [`OAuthProvider`]: it builds the authorization
//! URL the browser is sent to, exchanges the returned code for a provider
//! token and fetches the account profile with it. Providers are looked up by
//! name through the [`ProviderRegistry`].
//!
//! Outbound calls share one [`OAuthClient`] with a bounded timeout. Calls are
//! never retried because an authorization code is single-use.

mod apple;
mod client;
mod github;
mod google;
mod oidc;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::config::ThirdPartyConfig;
use crate::error::AuthError;

pub use apple::AppleProvider;
pub use client::{OAuthClient, TokenResponse};
pub use github::GitHubProvider;
pub use google::google_provider;
pub use oidc::{OidcEndpoints, OidcProvider};

/// Errors from outbound provider calls.
///
/// The detail is for logs only; clients see [`ProviderError::public_description`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The token endpoint rejected the code or answered with garbage.
    #[error("Code exchange failed: {0}")]
    CodeExchangeFailed(String),

    /// The profile could not be retrieved or was incomplete.
    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    /// The provider could not be reached in time.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Description that may be shown to the end user.
    #[must_use]
    pub fn public_description(&self) -> &'static str {
        match self {
            Self::CodeExchangeFailed(_) => "could not exchange authorization code for access token",
            Self::ProfileFetchFailed(_) => "could not retrieve user data from provider",
            Self::Unavailable(_) => "provider unavailable",
        }
    }
}

/// Token material returned by a provider's token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderToken {
    pub access_token: String,
    pub id_token: Option<String>,
}

impl std::fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderToken")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Normalized account profile from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// The provider's stable subject identifier.
    pub external_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// A third-party OAuth provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Lower-case provider name, as used in requests and identity records.
    fn name(&self) -> &str;

    /// URL the user agent is sent to, carrying `state` verbatim.
    fn authorization_url(&self, state: &str) -> Url;

    /// Exchanges an authorization code for a provider token.
    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, ProviderError>;

    /// Fetches the profile of the account the token belongs to.
    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError>;
}

/// Enabled providers keyed by lower-cased name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration, skipping disabled providers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built, a
    /// provider URL does not parse or the Apple signing key is invalid.
    pub fn from_config(config: &ThirdPartyConfig) -> AuthResult<Self> {
        let client = OAuthClient::new(config.request_timeout)?;
        let redirect_url = parse_config_url("third_party.redirect_url", &config.redirect_url)?;
        let mut registry = Self::new();

        let providers = &config.providers;
        if providers.google.enabled {
            registry.register(google_provider(
                &providers.google,
                redirect_url.clone(),
                client.clone(),
            )?);
        }
        if providers.github.enabled {
            registry.register(GitHubProvider::new(
                &providers.github,
                redirect_url.clone(),
                client.clone(),
            )?);
        }
        if providers.apple.enabled {
            registry.register(AppleProvider::new(
                &providers.apple,
                redirect_url.clone(),
                client.clone(),
            )?);
        }
        for (name, custom) in &config.custom_providers {
            if custom.enabled {
                registry.register(OidcProvider::from_config(
                    name,
                    custom,
                    redirect_url.clone(),
                    client.clone(),
                )?);
            }
        }

        tracing::info!(providers = ?registry.names(), "Third-party providers registered");
        Ok(registry)
    }

    /// Registers a provider, replacing any provider with the same name.
    pub fn register<P: OAuthProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_lowercase(), Arc::new(provider));
    }

    /// Resolves a provider by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if no enabled provider has that name.
    pub fn resolve(&self, name: &str) -> AuthResult<Arc<dyn OAuthProvider>> {
        self.providers
            .get(&name.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| AuthError::unknown_provider(name))
    }

    /// Sorted names of the registered providers.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn parse_config_url(field: &str, value: &str) -> AuthResult<Url> {
    Url::parse(value)
        .map_err(|e| AuthError::configuration(format!("{field} is not a valid URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OidcProviderConfig, ProviderConfig};

    fn config() -> ThirdPartyConfig {
        let mut config = ThirdPartyConfig::default();
        config.providers.google = ProviderConfig {
            enabled: true,
            client_id: "google-client".to_string(),
            secret: "google-secret".to_string(),
        };
        config.providers.github = ProviderConfig {
            enabled: false,
            client_id: "gh".to_string(),
            secret: "gh".to_string(),
        };
        config.custom_providers.insert(
            "Corp".to_string(),
            OidcProviderConfig {
                client_id: "corp-client".to_string(),
                secret: "corp-secret".to_string(),
                authorization_endpoint: "https://sso.corp.example/authorize".to_string(),
                token_endpoint: "https://sso.corp.example/token".to_string(),
                userinfo_endpoint: "https://sso.corp.example/userinfo".to_string(),
                ..OidcProviderConfig::default()
            },
        );
        config
    }

    #[test]
    fn test_registry_from_config_skips_disabled() {
        let registry = ProviderRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.names(), vec!["corp".to_string(), "google".to_string()]);
        assert!(registry.resolve("github").is_err());
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = ProviderRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.resolve("Google").unwrap().name(), "google");
        assert_eq!(registry.resolve("CORP").unwrap().name(), "corp");
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("myspace").err().unwrap();
        assert!(matches!(err, AuthError::UnknownProvider { ref name } if name == "myspace"));
        assert_eq!(err.redirect_error_code(), "invalid_request");
    }

    #[test]
    fn test_public_descriptions() {
        assert_eq!(
            ProviderError::ProfileFetchFailed("HTTP 500".into()).public_description(),
            "could not retrieve user data from provider"
        );
        assert_eq!(
            ProviderError::Unavailable("timeout".into()).public_description(),
            "provider unavailable"
        );
    }

    #[test]
    fn test_token_debug_redacts() {
        let token = ProviderToken {
            access_token: "secret-access".to_string(),
            id_token: Some("secret-id".to_string()),
        };
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-id"));
    }
}
