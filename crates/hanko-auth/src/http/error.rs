//! JSON error responses for the API-facing endpoints.
//!
//! Browser-facing third-party routes never use this; they always redirect.

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if self.is_server_error() {
            tracing::error!(error = %self, category = %self.category(), "Request failed");
        }
        let message = self.public_description();

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(&message);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        let body = json!({
            "code": status.as_u16(),
            "message": message,
        });
        (status, headers, Json(body)).into_response()
    }
}

/// HTTP status for an error.
#[must_use]
pub fn status_code(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidRequest { .. }
        | AuthError::UnknownProvider { .. }
        | AuthError::State(_)
        | AuthError::Provider(_)
        | AuthError::ProviderReported { .. } => StatusCode::BAD_REQUEST,
        AuthError::Unauthorized { .. } | AuthError::NotFound { .. } => StatusCode::UNAUTHORIZED,
        AuthError::AccountLinkingConflict { .. } => StatusCode::CONFLICT,
        AuthError::UnverifiedEmail | AuthError::SignupDisabled => StatusCode::FORBIDDEN,
        AuthError::Storage { .. } | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Format: `Bearer realm="hanko", error="invalid_token", error_description="..."`
fn build_www_authenticate_header(description: &str) -> String {
    let escaped_desc = description.replace('"', "\\\"");
    format!("Bearer realm=\"hanko\", error=\"invalid_token\", error_description=\"{escaped_desc}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response = AuthError::unauthorized("invalid refresh token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(www_auth.starts_with("Bearer realm=\"hanko\""));
        assert!(www_auth.contains("error_description=\"invalid refresh token\""));

        let body = body_json(response).await;
        assert_eq!(body["code"], 401);
        assert_eq!(body["message"], "invalid refresh token");
    }

    #[tokio::test]
    async fn test_server_error_hides_detail() {
        let response = AuthError::storage("relation \"refresh_tokens\" does not exist").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));

        let body = body_json(response).await;
        assert_eq!(body["message"], crate::error::SERVER_ERROR_DESCRIPTION);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_code(&AuthError::invalid_request("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_code(&AuthError::account_linking_conflict("x")),
            StatusCode::CONFLICT
        );
        assert_eq!(status_code(&AuthError::SignupDisabled), StatusCode::FORBIDDEN);
        assert_eq!(
            status_code(&AuthError::not_found("token")),
            StatusCode::UNAUTHORIZED
        );
    }
}
