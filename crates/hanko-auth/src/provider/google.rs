//! Google sign-in.

use url::Url;

use super::{OAuthClient, OidcEndpoints, OidcProvider};
use crate::AuthResult;
use crate::config::ProviderConfig;
use crate::error::AuthError;

const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Builds the Google provider.
///
/// Google is a standard OpenID Connect provider. `prompt=consent` makes Google
/// show the account chooser on every sign-in.
///
/// # Errors
///
/// Returns a configuration error if a built-in endpoint fails to parse.
pub fn google_provider(
    config: &ProviderConfig,
    redirect_url: Url,
    client: OAuthClient,
) -> AuthResult<OidcProvider> {
    let parse = |value: &str| {
        Url::parse(value).map_err(|e| AuthError::configuration(format!("invalid Google endpoint: {e}")))
    };
    let endpoints = OidcEndpoints {
        authorization: parse(AUTHORIZATION_ENDPOINT)?,
        token: parse(TOKEN_ENDPOINT)?,
        userinfo: parse(USERINFO_ENDPOINT)?,
    };
    Ok(OidcProvider::new(
        "google",
        &config.client_id,
        &config.secret,
        redirect_url,
        endpoints,
        client,
    )
    .with_auth_param("prompt", "consent"))
}
