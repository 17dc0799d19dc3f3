//! Error rendering.
//!
//! Error responses carry an [`ErrorReport`] extension. In development this
//! middleware rewrites their bodies to include the unfiltered message and
//! debug detail; in production the public body is left as is.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{ErrorReport, status_label};
use crate::state::AppState;

pub async fn render_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    if !state.config().environment.is_development() {
        return response;
    }
    let Some(report) = response.extensions().get::<Arc<ErrorReport>>().cloned() else {
        return response;
    };

    let status = response.status();
    let mut headers = response.headers().clone();
    headers.remove(CONTENT_LENGTH);
    headers.remove(CONTENT_TYPE);

    let mut rendered = (
        status,
        Json(json!({
            "status": status_label(status),
            "message": report.message,
            "error": report.detail,
        })),
    )
        .into_response();
    rendered.headers_mut().extend(headers);
    rendered
}
