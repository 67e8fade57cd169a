//! Third-party sign-in endpoints.
//!
//! Thin adapters over [`ThirdPartyService`](crate::thirdparty::ThirdPartyService):
//! extract the request, call the service, and render its [`FlowResponse`].
//! Browser targets get `307` with `Location`; native deep-link targets get
//! `204` with `Location` since the user agent cannot follow them.

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;

use super::{AuthState, build_cookie, removal_cookie, request_context};
use crate::redirect::RedirectKind;
use crate::state::STATE_LIFESPAN;
use crate::thirdparty::{AuthorizeRequest, CallbackParams, FlowResponse, STATE_COOKIE, StateCookie};

/// `GET /thirdparty/auth`
pub async fn authorize_query(
    State(state): State<AuthState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let request = parse_authorize_form(raw_query.unwrap_or_default().as_bytes());
    authorize(&state, &method, &uri, &headers, jar, request).await
}

/// `POST /thirdparty/auth` with a JSON or form-encoded body.
pub async fn authorize_body(
    State(state): State<AuthState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let request = parse_authorize_body(&headers, &body);
    authorize(&state, &method, &uri, &headers, jar, request).await
}

/// `GET /thirdparty/callback`
pub async fn callback(
    State(state): State<AuthState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let ctx = request_context(&method, &uri, &headers);
    let params = parse_callback_query(raw_query.as_deref().unwrap_or_default());
    let state_cookie = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let response = state
        .thirdparty
        .callback(
            &params,
            state_cookie.as_deref(),
            raw_query.as_deref().unwrap_or_default(),
            &ctx,
        )
        .await;
    render(&state, jar, response)
}

/// `POST /thirdparty/callback`: re-issues a form-post callback as a `GET`.
pub async fn callback_post(State(state): State<AuthState>, body: Bytes) -> Response {
    let location = state.thirdparty.callback_post_redirect(&body);
    Redirect::to(&location).into_response()
}

async fn authorize(
    state: &AuthState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    jar: CookieJar,
    request: AuthorizeRequest,
) -> Response {
    let ctx = request_context(method, uri, headers);
    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok());
    let response = state.thirdparty.authorize(&request, referer, &ctx).await;
    render(state, jar, response)
}

fn parse_authorize_body(headers: &HeaderMap, body: &[u8]) -> AuthorizeRequest {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        return serde_json::from_slice(body).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Malformed authorize body");
            AuthorizeRequest::default()
        });
    }

    parse_authorize_form(body)
}

// Query strings and form bodies are parsed leniently so that a repeated or
// malformed parameter still ends in a redirect. The first value wins.
fn parse_authorize_form(input: &[u8]) -> AuthorizeRequest {
    let mut provider = None;
    let mut redirect_to = None;
    for (key, value) in url::form_urlencoded::parse(input) {
        let slot = match key.as_ref() {
            "provider" => &mut provider,
            "redirect_to" => &mut redirect_to,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }
    AuthorizeRequest {
        provider: provider.unwrap_or_default(),
        redirect_to: redirect_to.unwrap_or_default(),
    }
}

fn parse_callback_query(input: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    for (key, value) in url::form_urlencoded::parse(input.as_bytes()) {
        let slot = match key.as_ref() {
            "state" => &mut params.state,
            "code" => &mut params.code,
            "error" => &mut params.error,
            "error_description" => &mut params.error_description,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }
    params
}

fn render(state: &AuthState, jar: CookieJar, response: FlowResponse) -> Response {
    let cookie_config = state.cookie_config();
    let jar = match response.state_cookie {
        StateCookie::Set(value) => {
            let mut cookie = build_cookie(cookie_config, STATE_COOKIE, value, STATE_LIFESPAN);
            cookie.set_same_site(cookie::SameSite::Lax);
            jar.add(cookie)
        }
        StateCookie::Clear => {
            let mut cookie = removal_cookie(cookie_config, STATE_COOKIE);
            cookie.set_same_site(cookie::SameSite::Lax);
            jar.add(cookie)
        }
        StateCookie::Keep => jar,
    };

    match response.kind {
        RedirectKind::Browser => (jar, Redirect::temporary(&response.location)).into_response(),
        RedirectKind::NativeDeepLink => (
            StatusCode::NO_CONTENT,
            jar,
            [(header::LOCATION, response.location)],
        )
            .into_response(),
    }
}
