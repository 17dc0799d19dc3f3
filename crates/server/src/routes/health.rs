//! Liveness endpoint. 200 when PostgreSQL answers, 503 otherwise.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    postgres: bool,
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let postgres = state.postgres_healthy().await;

    let (status_code, status) = if postgres {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (status_code, Json(HealthResponse { status, postgres }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
