use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    match state.store.ping().await {
        Ok(()) => Json(HealthResponse { status: "ok", db_ok: true, db_error: None }),
        Err(err) => {
            tracing::warn!(error = %err, "health check could not reach the credential store");
            Json(HealthResponse { status: "degraded", db_ok: false, db_error: Some(err.to_string()) })
        }
    }
}
