use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    pub storage: String,
}

/// Readiness probe. Reports 503 while the image engine is anything other
/// than `Ready`, so load balancers stop routing uploads during shutdown.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Image engine is not ready", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine_state = state.engine.state();
    let ready = state.engine.is_ready();

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "unavailable" }.to_string(),
            engine: format!("{engine_state:?}"),
            storage: state.storage.backend_type().to_string(),
        }),
    )
}
