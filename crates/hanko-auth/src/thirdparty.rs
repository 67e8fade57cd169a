//! Third-party sign-in flow.
//!
//! [`ThirdPartyService`] drives the two browser hops of the authorization code
//! flow:
//!
//! 1. **authorize** validates the redirect target, resolves the provider,
//!    issues a [`FlowState`](crate::state::FlowState) and sends the user agent
//!    to the provider with the state both in the URL and in a cookie.
//! 2. **callback** verifies the state pair, exchanges the code, fetches the
//!    profile, links the account and issues a one-time exchange token, all in
//!    one storage transaction bounded by `callback_timeout`.
//!
//! The service knows nothing about HTTP. It returns a [`FlowResponse`] which
//! the handlers in [`crate::http::thirdparty`] turn into a response. Every
//! exit, including failures, is a redirect.
//!
//! # Native clients without the state cookie
//!
//! Some in-app browsers drop cookies across the provider hop. When the
//! callback arrives without a state cookie, the query state verifies, and it
//! targets a non-HTTP (deep link) URL, the raw callback query is forwarded to
//! `third_party.native_callback_url` without nonce verification. This trades
//! CSRF protection for those clients and is disabled unless that URL is set.

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::AuthResult;
use crate::audit::{AuditEventType, AuditLogger, RequestContext};
use crate::config::{AuthConfig, ThirdPartyConfig};
use crate::error::AuthError;
use crate::linking::{AccountLinker, AccountLinkingResult};
use crate::provider::ProviderRegistry;
use crate::redirect::{RedirectAllowList, RedirectKind, append_query, error_redirect_url};
use crate::state::StateCodec;
use crate::storage::{Persister, Transaction, with_transaction};
use crate::telemetry::{Breadcrumb, TelemetrySink, TracingTelemetry};
use crate::types::ExchangeToken;

/// Name of the cookie carrying the flow state.
pub const STATE_COOKIE: &str = "hanko_thirdparty_state";

/// Query parameter carrying the exchange token on success.
pub const TOKEN_QUERY: &str = "hanko_token";

/// `/thirdparty/auth` parameters (query or JSON/form body).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizeRequest {
    pub provider: String,
    pub redirect_to: String,
}

/// `/thirdparty/callback` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What to do with the state cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateCookie {
    Set(String),
    Clear,
    Keep,
}

/// Outcome of a flow step: where the user agent goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResponse {
    pub kind: RedirectKind,
    pub location: String,
    pub state_cookie: StateCookie,
}

impl FlowResponse {
    fn redirect(kind: RedirectKind, location: impl Into<String>, state_cookie: StateCookie) -> Self {
        Self {
            kind,
            location: location.into(),
            state_cookie,
        }
    }
}

struct LinkedCallback {
    linking: AccountLinkingResult,
    location: Url,
}

/// Orchestrates the third-party sign-in flow.
pub struct ThirdPartyService {
    config: ThirdPartyConfig,
    codec: StateCodec,
    allow_list: RedirectAllowList,
    providers: ProviderRegistry,
    linker: AccountLinker,
    persister: Arc<dyn Persister>,
    audit: AuditLogger,
    telemetry: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for ThirdPartyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThirdPartyService")
            .field("providers", &self.providers)
            .field("linker", &self.linker)
            .finish_non_exhaustive()
    }
}

impl ThirdPartyService {
    /// Builds the service with the providers enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a provider or the state codec cannot
    /// be set up.
    pub fn from_config(config: &AuthConfig, persister: Arc<dyn Persister>) -> AuthResult<Self> {
        let providers = ProviderRegistry::from_config(&config.third_party)?;
        Self::new(config, providers, persister)
    }

    /// Builds the service with an explicit provider registry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no secret key is configured or an
    /// allow-list pattern is invalid.
    pub fn new(
        config: &AuthConfig,
        providers: ProviderRegistry,
        persister: Arc<dyn Persister>,
    ) -> AuthResult<Self> {
        Ok(Self {
            codec: StateCodec::new(&config.secrets.keys)?,
            allow_list: RedirectAllowList::new(&config.third_party.allowed_redirect_urls)?,
            config: config.third_party.clone(),
            providers,
            linker: AccountLinker::new(config.account.clone()),
            audit: AuditLogger::new(Arc::clone(&persister), config.audit_log.clone()),
            persister,
            telemetry: Arc::new(TracingTelemetry),
        })
    }

    /// Replaces the default `tracing` telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Starts a flow.
    ///
    /// Failures before the redirect target is accepted go to `referer` (or the
    /// configured error URL); later failures go back to the redirect target.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        referer: Option<&str>,
        ctx: &RequestContext,
    ) -> FlowResponse {
        let fallback = referer
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(self.config.error_redirect_url.as_str());

        let redirect_to = request.redirect_to.trim();
        if redirect_to.is_empty() {
            let err = AuthError::invalid_request("redirect_to is required");
            return self.fail(RedirectKind::Browser, fallback, err, ctx).await;
        }
        if request.provider.trim().is_empty() {
            let err = AuthError::invalid_request("provider is required");
            return self.fail(RedirectKind::Browser, fallback, err, ctx).await;
        }
        if !self.allow_list.is_allowed(redirect_to) {
            let err = AuthError::invalid_request(format!("redirect to '{redirect_to}' not allowed"));
            return self.fail(RedirectKind::Browser, fallback, err, ctx).await;
        }

        let kind = RedirectKind::for_target(redirect_to);
        let provider = match self.providers.resolve(&request.provider) {
            Ok(provider) => provider,
            Err(err) => return self.fail(kind, redirect_to, err, ctx).await,
        };
        let issued = match self.codec.issue(provider.name(), redirect_to) {
            Ok(issued) => issued,
            Err(err) => return self.fail(kind, redirect_to, err, ctx).await,
        };

        self.telemetry.breadcrumb(
            Breadcrumb::new("thirdparty", "authorization started").with("provider", provider.name()),
        );
        tracing::debug!(provider = %provider.name(), kind = ?kind, "Redirecting to provider");

        let location = provider.authorization_url(&issued.value);
        FlowResponse::redirect(kind, location, StateCookie::Set(issued.value))
    }

    /// Completes a flow.
    ///
    /// `raw_query` is the undecoded callback query string, only used for the
    /// native client forward.
    pub async fn callback(
        &self,
        params: &CallbackParams,
        state_cookie: Option<&str>,
        raw_query: &str,
        ctx: &RequestContext,
    ) -> FlowResponse {
        let query_state = params.state.as_deref().map(str::trim).unwrap_or_default();

        // Only a state we signed decides the response shape; anything else is
        // answered as a browser redirect.
        let kind = self
            .codec
            .decode(query_state)
            .map(|state| state.redirect_kind())
            .unwrap_or(RedirectKind::Browser);

        if state_cookie.is_none()
            && !kind.is_browser()
            && let Some(forward) = self.native_forward(raw_query)
        {
            tracing::warn!("State cookie missing for a native client, forwarding callback without nonce check");
            self.telemetry
                .capture_message("thirdparty callback forwarded without state cookie");
            return FlowResponse::redirect(RedirectKind::Browser, forward, StateCookie::Keep);
        }

        let error_target = self.config.error_redirect_url.as_str();
        let timeout = self.config.callback_timeout;
        let linked = tokio::time::timeout(
            timeout,
            with_transaction(self.persister.as_ref(), |mut tx| async move {
                let result = self
                    .link_callback(tx.as_mut(), params, query_state, state_cookie)
                    .await;
                (tx, result)
            }),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AuthError::internal(format!(
                "callback did not complete within {timeout:?}"
            )))
        });

        let linked = match linked {
            Ok(linked) => linked,
            Err(err) => return self.fail(kind, error_target, err, ctx).await,
        };

        let user_id = linked.linking.user.id;
        if let Err(err) = self
            .audit
            .create(linked.linking.kind.audit_event(), Some(user_id), None, ctx)
            .await
        {
            // The account is linked already; only the response changes.
            tracing::error!(error = %err, user_id = %user_id, "Failed to write audit log after linking");
            let err = AuthError::internal(format!("could not create audit log: {err}"));
            self.telemetry.capture_error(&err);
            let location = error_redirect_url(error_target, &self.config.error_redirect_url, &err);
            return FlowResponse::redirect(kind, location, StateCookie::Keep);
        }

        tracing::info!(
            provider = %linked.linking.identity.provider,
            user_id = %user_id,
            outcome = ?linked.linking.kind,
            "Third-party sign-in completed"
        );
        FlowResponse::redirect(kind, linked.location, StateCookie::Clear)
    }

    /// Location for the `303` that turns a form-post callback into a `GET`.
    #[must_use]
    pub fn callback_post_redirect(&self, form_body: &[u8]) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(url::form_urlencoded::parse(form_body))
            .finish();
        format!(
            "{}/thirdparty/callback?{query}",
            self.config.path_prefix.trim_end_matches('/')
        )
    }

    async fn link_callback(
        &self,
        tx: &mut dyn Transaction,
        params: &CallbackParams,
        query_state: &str,
        state_cookie: Option<&str>,
    ) -> AuthResult<LinkedCallback> {
        let state_cookie = state_cookie
            .ok_or_else(|| AuthError::invalid_request("thirdparty state cookie is missing"))?;
        if query_state.is_empty() {
            return Err(AuthError::invalid_request("state is missing from request"));
        }
        let state = self.codec.verify(query_state, state_cookie)?;

        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(AuthError::provider_reported(
                error,
                params.error_description.clone().unwrap_or_default(),
            ));
        }

        let provider = self.providers.resolve(&state.provider)?;
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_request("auth code missing from request"))?;

        let token = provider.exchange_code(code).await?;
        self.telemetry.breadcrumb(
            Breadcrumb::new("thirdparty", "authorization code exchanged")
                .with("provider", provider.name()),
        );
        let profile = provider.fetch_profile(&token).await?;

        let linking = self.linker.link(tx, provider.name(), &profile).await?;

        let (value, exchange_token) = ExchangeToken::generate(linking.user.id);
        tx.create_exchange_token(&exchange_token).await?;

        let location = append_query(&state.redirect_to, TOKEN_QUERY, &value)?;
        Ok(LinkedCallback { linking, location })
    }

    fn native_forward(&self, raw_query: &str) -> Option<Url> {
        let mut url = Url::parse(self.config.native_callback_url.as_deref()?).ok()?;
        url.set_query(Some(raw_query));
        Some(url)
    }

    async fn fail(
        &self,
        kind: RedirectKind,
        target: &str,
        mut err: AuthError,
        ctx: &RequestContext,
    ) -> FlowResponse {
        if err.is_server_error() {
            tracing::error!(error = %err, "Third-party flow failed");
            self.telemetry.capture_error(&err);
        } else {
            tracing::info!(error = %err, category = %err.category(), "Third-party flow rejected");
            if let Err(audit_err) = self
                .audit
                .create(
                    AuditEventType::ThirdpartySigninSignupFailed,
                    None,
                    Some(err.to_string()),
                    ctx,
                )
                .await
            {
                tracing::error!(error = %audit_err, "Failed to write audit log");
                err = AuthError::internal(format!("could not create audit log: {audit_err}"));
                self.telemetry.capture_error(&err);
            }
        }

        let location = error_redirect_url(target, &self.config.error_redirect_url, &err);
        FlowResponse::redirect(kind, location, StateCookie::Keep)
    }
}
