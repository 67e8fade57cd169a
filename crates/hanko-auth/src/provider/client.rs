//! HTTP client shared by all providers.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{ProviderError, ProviderToken};
use crate::AuthResult;
use crate::error::AuthError;

const USER_AGENT: &str = concat!("hanko-backend/", env!("CARGO_PKG_VERSION"));

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl From<TokenResponse> for ProviderToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            id_token: response.id_token,
        }
    }
}

/// Error response (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Thin wrapper around `reqwest::Client` for token and profile calls.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// POSTs a form to a token endpoint and parses the token response.
    ///
    /// Some providers answer `200 OK` with an error body, so the body is
    /// checked for an `error` member regardless of the status.
    pub async fn exchange_code(
        &self,
        token_endpoint: &Url,
        params: &[(&str, &str)],
    ) -> Result<ProviderToken, ProviderError> {
        tracing::debug!(endpoint = %token_endpoint, "Exchanging authorization code");

        let response = self
            .http
            .post(token_endpoint.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| classify(e, ProviderError::CodeExchangeFailed))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify(e, ProviderError::CodeExchangeFailed))?;

        if let Ok(error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
            return Err(ProviderError::CodeExchangeFailed(format!(
                "{}: {}",
                error.error,
                error.error_description.unwrap_or_default()
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::CodeExchangeFailed(format!(
                "HTTP {status} - {body}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::CodeExchangeFailed(format!("failed to parse token response: {e}"))
        })?;
        if token.access_token.is_empty() {
            return Err(ProviderError::CodeExchangeFailed(
                "token response has an empty access_token".to_string(),
            ));
        }
        Ok(token.into())
    }

    /// GETs a JSON document with a bearer token.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url.as_str())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| classify(e, ProviderError::ProfileFetchFailed))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ProfileFetchFailed(format!(
                "HTTP {status} from {url} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ProfileFetchFailed(format!("failed to parse {url}: {e}")))
    }

    /// GETs a public JSON document.
    pub async fn get_public_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| classify(e, ProviderError::ProfileFetchFailed))?;

        if !response.status().is_success() {
            return Err(ProviderError::ProfileFetchFailed(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ProfileFetchFailed(format!("failed to parse {url}: {e}")))
    }
}

/// Timeouts and connection failures are `Unavailable`; everything else uses `other`.
fn classify(err: reqwest::Error, other: fn(String) -> ProviderError) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        tracing::warn!(error = %err, "Provider unreachable");
        ProviderError::Unavailable(err.to_string())
    } else {
        other(err.to_string())
    }
}
