//! Session endpoints.
//!
//! A refresh token is accepted from `Authorization: Bearer` first and from the
//! `<name>-refresh` cookie otherwise. New sessions are returned as cookies and,
//! when `enable_auth_token_header` is set, also as `X-Auth-Token`.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AuthState, build_cookie, removal_cookie, request_context};
use crate::audit::AuditEventType;
use crate::error::AuthError;
use crate::session::{IssuedSession, MISSING_REFRESH_TOKEN};
use crate::telemetry::Breadcrumb;

/// Response header carrying the session token for non-cookie clients.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// `POST /token` body.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub value: String,
}

/// Body of a successful session response.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub session_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub expiration_time: OffsetDateTime,
}

/// `POST /sessions/refresh`
pub async fn refresh(
    State(state): State<AuthState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    let refresh_name = state.cookie_config().refresh_name();
    let (token, source) = match bearer_token(&headers) {
        Some(token) => (Some(token), "header"),
        None => (jar.get(&refresh_name).map(|c| c.value().to_string()), "cookie"),
    };

    if token.as_deref().is_none_or(|t| t.trim().is_empty()) {
        state
            .telemetry
            .breadcrumb(Breadcrumb::new("auth", "failed to find refresh token"));
        state.telemetry.capture_message(MISSING_REFRESH_TOKEN);
        return Err(AuthError::unauthorized(MISSING_REFRESH_TOKEN));
    }

    match state.sessions.exchange_refresh_token(token.as_deref()).await {
        Ok(session) => Ok(session_response(&state, jar, &session)),
        Err(err) => {
            state.telemetry.breadcrumb(
                Breadcrumb::new("auth", "failed to exchange refresh token").with("source", source),
            );
            state.telemetry.capture_error(&err);
            Err(err)
        }
    }
}

/// `POST /token`: redeems a `hanko_token` for a session.
pub async fn token(
    State(state): State<AuthState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<TokenRequest>,
) -> Result<Response, AuthError> {
    let ctx = request_context(&method, &uri, &headers);

    match state.sessions.redeem_exchange_token(&request.value).await {
        Ok(session) => {
            state
                .audit
                .create(AuditEventType::TokenExchangeSucceeded, Some(session.user_id), None, &ctx)
                .await
                .map_err(|e| AuthError::internal(format!("could not create audit log: {e}")))?;
            tracing::info!(user_id = %session.user_id, "Exchange token redeemed");
            Ok(session_response(&state, jar, &session))
        }
        Err(err) if err.is_server_error() => {
            state.telemetry.capture_error(&err);
            Err(err)
        }
        Err(err) => {
            state
                .audit
                .create(AuditEventType::TokenExchangeFailed, None, Some(err.to_string()), &ctx)
                .await
                .map_err(|e| AuthError::internal(format!("could not create audit log: {e}")))?;
            Err(err)
        }
    }
}

/// `POST /sessions/logout`
///
/// Always clears both cookies, even without a refresh token to revoke.
pub async fn logout(
    State(state): State<AuthState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    let cookie_config = state.cookie_config().clone();
    let refresh_name = cookie_config.refresh_name();
    let token = bearer_token(&headers)
        .or_else(|| jar.get(&refresh_name).map(|c| c.value().to_string()));

    if let Some(token) = token {
        let revoked = state.sessions.revoke_refresh_token(&token).await?;
        tracing::debug!(revoked, "Logout");
    }

    let jar = jar
        .add(removal_cookie(&cookie_config, cookie_config.name.clone()))
        .add(removal_cookie(&cookie_config, refresh_name));
    Ok((jar, StatusCode::NO_CONTENT).into_response())
}

/// `GET /.well-known/jwks.json`
pub async fn jwks(State(state): State<AuthState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(state.sessions.jwks()),
    )
}

fn session_response(state: &AuthState, jar: CookieJar, session: &IssuedSession) -> Response {
    let cookie_config = state.cookie_config();
    let now = OffsetDateTime::now_utc();

    let mut jar = jar.add(build_cookie(
        cookie_config,
        cookie_config.name.clone(),
        session.session_token.clone(),
        session.expires_at - now,
    ));
    if let (Some(refresh_token), Some(expires_at)) = (&session.refresh_token, session.refresh_expires_at) {
        jar = jar.add(build_cookie(
            cookie_config,
            cookie_config.refresh_name(),
            refresh_token.clone(),
            expires_at - now,
        ));
    }

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if state.sessions.config().enable_auth_token_header
        && let Ok(value) = HeaderValue::from_str(&session.session_token)
    {
        headers.insert(AUTH_TOKEN_HEADER, value);
    }

    let body = SessionResponse {
        user_id: session.user_id,
        session_id: session.session_id,
        expiration_time: session.expires_at,
    };
    (jar, headers, Json(body)).into_response()
}

/// Token from `Authorization: Bearer <token>`, if present.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::http::auth_router;
    use crate::http::testing::{config, set_cookie, state};
    use crate::provider::ProviderRegistry;
    use crate::storage::{MemoryPersister, Persister, Transaction};
    use crate::telemetry::testing::RecordingTelemetry;
    use crate::types::{ExchangeToken, User};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn refresh_request(bearer: Option<&str>, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/sessions/refresh");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(token) = cookie {
            builder = builder.header(header::COOKIE, format!("hanko-refresh={token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn issued_refresh_token(auth: &AuthState) -> String {
        auth.sessions
            .issue(Uuid::new_v4())
            .await
            .unwrap()
            .refresh_token
            .unwrap()
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_refresh_without_token() {
        let persister = MemoryPersister::new();
        let app = auth_router(state(&config(), ProviderRegistry::new(), &persister));

        let response = app.oneshot(refresh_request(None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "missing refresh token");
    }

    #[tokio::test]
    async fn test_refresh_failures_reach_telemetry() {
        let persister = MemoryPersister::new();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let app = auth_router(
            state(&config(), ProviderRegistry::new(), &persister).with_telemetry(telemetry.clone()),
        );

        let response = app.clone().oneshot(refresh_request(None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        {
            let crumbs = telemetry.breadcrumbs.lock().unwrap();
            assert_eq!(crumbs.len(), 1);
            assert_eq!(crumbs[0].category, "auth");
            assert_eq!(crumbs[0].message, "failed to find refresh token");
            assert_eq!(*telemetry.errors.lock().unwrap(), vec!["missing refresh token".to_string()]);
        }

        let response = app
            .oneshot(refresh_request(None, Some("secret-refresh-value")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let crumbs = telemetry.breadcrumbs.lock().unwrap();
        assert_eq!(crumbs.len(), 2);
        assert_eq!(crumbs[1].data.get("source").map(String::as_str), Some("cookie"));
        let errors = telemetry.errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("invalid refresh token"));

        let reported = crumbs
            .iter()
            .flat_map(|c| std::iter::once(c.message.clone()).chain(c.data.values().cloned()))
            .chain(errors.iter().cloned());
        for text in reported {
            assert!(!text.contains("secret-refresh-value"));
        }
    }

    #[tokio::test]
    async fn test_refresh_from_cookie_sets_cookies() {
        let persister = MemoryPersister::new();
        let auth = state(&config(), ProviderRegistry::new(), &persister);
        let token = issued_refresh_token(&auth).await;

        let response = auth_router(auth)
            .oneshot(refresh_request(None, Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(AUTH_TOKEN_HEADER));

        let session = set_cookie(&response, "hanko").unwrap();
        assert!(!session.value().is_empty());
        let refresh = set_cookie(&response, "hanko-refresh").unwrap();
        assert_ne!(refresh.value(), token);
        assert_eq!(refresh.http_only(), Some(true));
    }

    #[tokio::test]
    async fn test_bearer_takes_precedence_over_cookie() {
        let persister = MemoryPersister::new();
        let auth = state(&config(), ProviderRegistry::new(), &persister);
        let valid = issued_refresh_token(&auth).await;
        let app = auth_router(auth);

        let response = app
            .clone()
            .oneshot(refresh_request(Some(&valid), Some("bogus")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let rotated = set_cookie(&response, "hanko-refresh").unwrap().value().to_string();
        let response = app
            .oneshot(refresh_request(Some("bogus"), Some(&rotated)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "invalid refresh token");
    }

    #[tokio::test]
    async fn test_revoked_token_is_generic_401() {
        let persister = MemoryPersister::new();
        let auth = state(&config(), ProviderRegistry::new(), &persister);
        let token = issued_refresh_token(&auth).await;
        auth.sessions.revoke_refresh_token(&token).await.unwrap();

        let response = auth_router(auth)
            .oneshot(refresh_request(Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(body_json(response).await["message"], "invalid refresh token");
    }

    #[tokio::test]
    async fn test_auth_token_header() {
        let persister = MemoryPersister::new();
        let mut config = config();
        config.session.enable_auth_token_header = true;
        let auth = state(&config, ProviderRegistry::new(), &persister);
        let token = issued_refresh_token(&auth).await;

        let response = auth_router(auth.clone())
            .oneshot(refresh_request(Some(&token), None))
            .await
            .unwrap();
        let header_token = response.headers().get(AUTH_TOKEN_HEADER).unwrap().to_str().unwrap();
        assert!(auth.sessions.validate(header_token).is_ok());
    }

    #[tokio::test]
    async fn test_exchange_token_redeemed_once() {
        let persister = MemoryPersister::new();
        let auth = state(&config(), ProviderRegistry::new(), &persister);
        let user = User::new(Some("a@example.com".to_string()), true);
        let (value, token) = ExchangeToken::generate(user.id);
        let mut tx = persister.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.create_exchange_token(&token).await.unwrap();
        tx.commit().await.unwrap();

        let app = auth_router(auth);
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(format!(r#"{{"value":"{value}"}}"#)))
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response, "hanko").is_some());
        assert_eq!(body_json(response).await["user_id"], user.id.to_string());

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let events: Vec<_> = persister
            .audit_logs()
            .await
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            events,
            vec![
                AuditEventType::TokenExchangeSucceeded,
                AuditEventType::TokenExchangeFailed
            ]
        );
    }

    #[tokio::test]
    async fn test_logout_revokes_and_clears() {
        let persister = MemoryPersister::new();
        let auth = state(&config(), ProviderRegistry::new(), &persister);
        let token = issued_refresh_token(&auth).await;
        let app = auth_router(auth);

        let request = Request::builder()
            .method("POST")
            .uri("/sessions/logout")
            .header(header::COOKIE, format!("hanko-refresh={token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cleared = set_cookie(&response, "hanko-refresh").unwrap();
        assert_eq!(cleared.max_age(), Some(time::Duration::ZERO));
        assert!(set_cookie(&response, "hanko").is_some());

        let response = app.oneshot(refresh_request(Some(&token), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_jwks() {
        let persister = MemoryPersister::new();
        let app = auth_router(state(&config(), ProviderRegistry::new(), &persister));
        let request = Request::builder()
            .uri("/.well-known/jwks.json")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["keys"][0]["alg"], "ES384");
    }
}
