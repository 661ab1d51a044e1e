//! Health check endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
    })
}

/// Ready check endpoint (verifies the store answers queries)
pub async fn ready_check(State(state): State<AppState>) -> Response {
    match state.tracker.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ready".to_string(),
            version: state.version.clone(),
        })
        .into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    version: state.version.clone(),
                }),
            )
                .into_response()
        }
    }
}
