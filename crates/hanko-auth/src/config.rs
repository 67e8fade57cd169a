//! Authentication configuration.
//!
//! Configuration types for sessions, refresh tokens, third-party providers,
//! account linking and audit logging. All sections deserialize with defaults so
//! a partial TOML file or a handful of environment variables is enough.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth.secrets]
//! keys = ["change-me-to-a-long-random-value"]
//!
//! [auth.session]
//! lifespan = "12h"
//!
//! [auth.third_party]
//! redirect_url = "https://api.example.com/thirdparty/callback"
//! error_redirect_url = "https://app.example.com/error"
//! allowed_redirect_urls = ["https://app.example.com/**"]
//!
//! [auth.third_party.providers.google]
//! enabled = true
//! client_id = "..."
//! secret = "..."
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Minimum length of a secret key in bytes.
pub const MIN_SECRET_KEY_LEN: usize = 16;

/// Root authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret keys for signing flow state.
    pub secrets: SecretsConfig,

    /// Session and refresh token configuration.
    pub session: SessionConfig,

    /// Third-party (OAuth) sign-in configuration.
    pub third_party: ThirdPartyConfig,

    /// Account creation and linking policy.
    pub account: AccountConfig,

    /// Audit logging configuration.
    pub audit_log: AuditLogConfig,
}

/// Secret keys.
///
/// The first key signs new values; every key is accepted for verification so
/// keys can be rotated by prepending a new one.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub keys: Vec<String>,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a session token.
    #[serde(with = "humantime_serde")]
    pub lifespan: Duration,

    /// Optional `iss` claim for session tokens.
    pub issuer: Option<String>,

    /// Optional `aud` claim for session tokens.
    pub audience: Vec<String>,

    /// Also expose the session token as the `X-Auth-Token` response header.
    pub enable_auth_token_header: bool,

    /// Session cookie settings. The refresh cookie is named `<name>-refresh`.
    pub cookie: CookieConfig,

    /// Refresh token settings.
    pub refresh: RefreshConfig,

    /// Session token signing.
    pub signing: SigningConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifespan: Duration::from_secs(12 * 3600),
            issuer: None,
            audience: Vec::new(),
            enable_auth_token_header: false,
            cookie: CookieConfig::default(),
            refresh: RefreshConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

/// Cookie settings shared by session, refresh and flow state cookies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    /// One of "lax", "strict", "none".
    pub same_site: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "hanko".to_string(),
            domain: None,
            http_only: true,
            secure: true,
            same_site: "lax".to_string(),
        }
    }
}

impl CookieConfig {
    /// Name of the refresh token cookie.
    #[must_use]
    pub fn refresh_name(&self) -> String {
        format!("{}-refresh", self.name)
    }
}

/// Refresh token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Lifetime of a refresh token.
    #[serde(with = "humantime_serde")]
    pub lifespan: Duration,

    /// Issue a new refresh token on each exchange and revoke the old one.
    pub rotation: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            lifespan: Duration::from_secs(30 * 24 * 3600),
            rotation: true,
        }
    }
}

/// Session token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// PEM-encoded private key. A key pair is generated at startup when unset.
    pub private_key_pem: Option<String>,

    /// PEM-encoded public key matching `private_key_pem`.
    pub public_key_pem: Option<String>,

    /// Key ID placed in the JWT header.
    pub key_id: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            private_key_pem: None,
            public_key_pem: None,
            key_id: None,
        }
    }
}

/// Third-party sign-in configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThirdPartyConfig {
    /// Callback URL registered with every provider.
    pub redirect_url: String,

    /// Fallback error target when no better one is known.
    pub error_redirect_url: String,

    /// Glob patterns for permitted `redirect_to` targets.
    pub allowed_redirect_urls: Vec<String>,

    /// Path prefix the API is mounted under, used for the form-post hop.
    pub path_prefix: String,

    /// Custom-scheme URL that receives the raw callback query when a native
    /// client lost the state cookie. Unset disables that branch.
    pub native_callback_url: Option<String>,

    /// Timeout for each outbound provider call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Upper bound for the whole callback transaction.
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,

    /// Built-in providers.
    pub providers: ProvidersConfig,

    /// Generic OpenID Connect providers keyed by name.
    pub custom_providers: BTreeMap<String, OidcProviderConfig>,
}

impl Default for ThirdPartyConfig {
    fn default() -> Self {
        Self {
            redirect_url: "http://localhost:8000/thirdparty/callback".to_string(),
            error_redirect_url: "http://localhost:8888/error".to_string(),
            allowed_redirect_urls: Vec::new(),
            path_prefix: String::new(),
            native_callback_url: None,
            request_timeout: Duration::from_secs(10),
            callback_timeout: Duration::from_secs(30),
            providers: ProvidersConfig::default(),
            custom_providers: BTreeMap::new(),
        }
    }
}

/// Built-in provider settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub google: ProviderConfig,
    pub github: ProviderConfig,
    pub apple: AppleProviderConfig,
}

/// Client credentials for a built-in provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub client_id: String,
    pub secret: String,
}

/// Sign in with Apple settings.
///
/// Apple's client secret is a short-lived ES256 JWT signed with the team's
/// private key, so the key material replaces a static secret.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppleProviderConfig {
    pub enabled: bool,
    /// The Services ID.
    pub client_id: String,
    pub team_id: String,
    pub key_id: String,
    /// PKCS#8 PEM private key downloaded from the Apple developer portal.
    pub private_key_pem: String,
}

/// Generic OpenID Connect provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OidcProviderConfig {
    pub enabled: bool,
    pub display_name: Option<String>,
    pub client_id: String,
    pub secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub scopes: Vec<String>,
}

impl Default for OidcProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            display_name: None,
            client_id: String::new(),
            secret: String::new(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            userinfo_endpoint: String::new(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }
}

/// Account creation and linking policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Create new users for first-seen third-party accounts.
    pub allow_signup: bool,

    /// Link third-party accounts to existing users with the same verified email.
    pub link_by_email: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            allow_signup: true,
            link_by_email: true,
        }
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// Persist audit entries through the storage backend.
    pub storage_enabled: bool,

    /// Emit audit entries as structured log events.
    pub output_stdout: bool,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            storage_enabled: true,
            output_stdout: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if secrets are missing or too short, a URL does not
    /// parse, the signing algorithm is unsupported, or an enabled provider lacks
    /// credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secrets.keys.is_empty() {
            return Err(ConfigError::Missing("secrets.keys".to_string()));
        }
        if self
            .secrets
            .keys
            .iter()
            .any(|k| k.len() < MIN_SECRET_KEY_LEN)
        {
            return Err(ConfigError::InvalidValue(format!(
                "secrets.keys entries must be at least {MIN_SECRET_KEY_LEN} bytes"
            )));
        }

        match self.session.signing.algorithm.as_str() {
            "RS256" | "RS384" | "ES384" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                    other
                )));
            }
        }
        if self.session.signing.private_key_pem.is_some()
            != self.session.signing.public_key_pem.is_some()
        {
            return Err(ConfigError::InvalidValue(
                "session.signing requires both private_key_pem and public_key_pem".to_string(),
            ));
        }

        if self.session.lifespan.is_zero() || self.session.refresh.lifespan.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session lifespans must be > 0".to_string(),
            ));
        }

        match self.session.cookie.same_site.to_ascii_lowercase().as_str() {
            "lax" | "strict" | "none" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid cookie same_site: '{}'. Must be lax, strict, or none",
                    other
                )));
            }
        }

        let tp = &self.third_party;
        parse_url("third_party.redirect_url", &tp.redirect_url)?;
        parse_url("third_party.error_redirect_url", &tp.error_redirect_url)?;
        if let Some(native) = &tp.native_callback_url {
            parse_url("third_party.native_callback_url", native)?;
        }
        if tp.request_timeout.is_zero() || tp.callback_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "third_party timeouts must be > 0".to_string(),
            ));
        }

        for (name, provider) in [
            ("google", &tp.providers.google),
            ("github", &tp.providers.github),
        ] {
            if provider.enabled && (provider.client_id.is_empty() || provider.secret.is_empty()) {
                return Err(ConfigError::Missing(format!(
                    "third_party.providers.{name}.client_id/secret"
                )));
            }
        }

        let apple = &tp.providers.apple;
        if apple.enabled
            && (apple.client_id.is_empty()
                || apple.team_id.is_empty()
                || apple.key_id.is_empty()
                || apple.private_key_pem.is_empty())
        {
            return Err(ConfigError::Missing(
                "third_party.providers.apple client_id, team_id, key_id and private_key_pem"
                    .to_string(),
            ));
        }

        for (name, provider) in &tp.custom_providers {
            if !provider.enabled {
                continue;
            }
            if provider.client_id.is_empty() {
                return Err(ConfigError::Missing(format!(
                    "third_party.custom_providers.{name}.client_id"
                )));
            }
            parse_url(
                "custom provider authorization_endpoint",
                &provider.authorization_endpoint,
            )?;
            parse_url("custom provider token_endpoint", &provider.token_endpoint)?;
            parse_url(
                "custom provider userinfo_endpoint",
                &provider.userinfo_endpoint,
            )?;
        }

        Ok(())
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(format!("{field}: {e}")))
}
