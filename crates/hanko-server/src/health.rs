use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::server::AppState;

/// `GET /health/ready`: 200 when a storage round trip succeeds, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.persister.health().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ready": true }))),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ready": false })))
        }
    }
}

/// `GET /health/alive`
pub async fn alive() -> impl IntoResponse {
    Json(json!({ "alive": true }))
}
