//! Axum handlers for the session and third-party endpoints.
//!
//! # Routes
//!
//! - `GET|POST /thirdparty/auth` - start a third-party sign-in
//! - `GET /thirdparty/callback` - provider callback
//! - `POST /thirdparty/callback` - form-post callback, re-issued as `GET`
//! - `POST /token` - redeem a one-time exchange token
//! - `POST /sessions/refresh` - exchange a refresh token
//! - `POST /sessions/logout` - revoke the refresh token and clear cookies
//! - `GET /.well-known/jwks.json` - session token verification keys

pub mod error;
pub mod session;
pub mod thirdparty;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, Method, Uri, header};
use axum::routing::{get, post};
use cookie::{Cookie, SameSite};

use crate::AuthResult;
use crate::audit::{AuditLogger, RequestContext};
use crate::config::{AuthConfig, CookieConfig};
use crate::session::SessionManager;
use crate::storage::Persister;
use crate::telemetry::{TelemetrySink, TracingTelemetry};
use crate::thirdparty::ThirdPartyService;

/// Shared state of the auth routes.
#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<SessionManager>,
    pub thirdparty: Arc<ThirdPartyService>,
    pub audit: AuditLogger,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl AuthState {
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>, thirdparty: Arc<ThirdPartyService>, audit: AuditLogger) -> Self {
        Self {
            sessions,
            thirdparty,
            audit,
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    /// Builds every service from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the signing key, state codec or a
    /// provider cannot be set up.
    pub fn from_config(config: &AuthConfig, persister: Arc<dyn Persister>) -> AuthResult<Self> {
        let sessions = SessionManager::from_config(&config.session, Arc::clone(&persister))?;
        let thirdparty = ThirdPartyService::from_config(config, Arc::clone(&persister))?;
        let audit = AuditLogger::new(persister, config.audit_log.clone());
        Ok(Self::new(Arc::new(sessions), Arc::new(thirdparty), audit))
    }

    /// Replaces the telemetry sink of the session handlers.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn cookie_config(&self) -> &CookieConfig {
        &self.sessions.config().cookie
    }
}

/// Creates the auth router.
pub fn auth_router(state: AuthState) -> Router {
    Router::new()
        .route(
            "/thirdparty/auth",
            get(thirdparty::authorize_query).post(thirdparty::authorize_body),
        )
        .route(
            "/thirdparty/callback",
            get(thirdparty::callback).post(thirdparty::callback_post),
        )
        .route("/token", post(session::token))
        .route("/sessions/refresh", post(session::refresh))
        .route("/sessions/logout", post(session::logout))
        .route("/.well-known/jwks.json", get(session::jwks))
        .with_state(state)
}

/// Audit context for the current request.
pub(crate) fn request_context(method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestContext {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    };

    let ip = header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .or_else(|| header_str("x-real-ip"));

    RequestContext {
        method: method.to_string(),
        path: uri.path().to_string(),
        user_agent: header_str(header::USER_AGENT.as_str()),
        ip,
        request_id: header_str("x-request-id"),
    }
}

/// Builds a cookie with the configured domain and security attributes.
pub(crate) fn build_cookie(
    config: &CookieConfig,
    name: impl Into<String>,
    value: impl Into<String>,
    max_age: time::Duration,
) -> Cookie<'static> {
    let mut cookie = Cookie::build((name.into(), value.into()))
        .path("/")
        .http_only(config.http_only)
        .secure(config.secure)
        .same_site(same_site(&config.same_site))
        .max_age(max_age)
        .build();
    if let Some(domain) = &config.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// A removal cookie (`Max-Age=0`) carrying the same attributes as [`build_cookie`].
///
/// Added to the jar rather than passed to `CookieJar::remove`, so it is sent
/// even when the request did not carry the cookie.
pub(crate) fn removal_cookie(config: &CookieConfig, name: impl Into<String>) -> Cookie<'static> {
    let mut cookie = build_cookie(config, name, "", time::Duration::ZERO);
    cookie.make_removal();
    cookie
}

fn same_site(value: &str) -> SameSite {
    match value.to_ascii_lowercase().as_str() {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => SameSite::Lax,
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use axum::response::Response;

    use super::*;
    use crate::provider::ProviderRegistry;
    use crate::storage::MemoryPersister;

    pub fn config() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.secrets.keys = vec!["test-secret-key-0123456789".to_string()];
        config.session.signing.algorithm = "ES384".to_string();
        config.third_party.error_redirect_url = "https://app.example/error".to_string();
        config.third_party.allowed_redirect_urls =
            vec!["https://app.example/**".to_string(), "myapp://login".to_string()];
        config
    }

    pub fn state(config: &AuthConfig, providers: ProviderRegistry, persister: &MemoryPersister) -> AuthState {
        let persister: Arc<dyn Persister> = Arc::new(persister.clone());
        let sessions = SessionManager::from_config(&config.session, Arc::clone(&persister)).unwrap();
        let thirdparty = ThirdPartyService::new(config, providers, Arc::clone(&persister)).unwrap();
        let audit = AuditLogger::new(persister, config.audit_log.clone());
        AuthState::new(Arc::new(sessions), Arc::new(thirdparty), audit)
    }

    pub fn set_cookies(response: &Response) -> Vec<Cookie<'static>> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| Cookie::parse(v.to_str().unwrap().to_string()).unwrap())
            .collect()
    }

    pub fn set_cookie(response: &Response, name: &str) -> Option<Cookie<'static>> {
        set_cookies(response).into_iter().find(|c| c.name() == name)
    }
}
