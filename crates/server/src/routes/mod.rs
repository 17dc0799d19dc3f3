//! HTTP route handlers.

pub mod extract;
pub mod health;
pub mod reviews;
pub mod static_files;
pub mod tours;
pub mod users;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;

use crate::middleware::rate_limit::limit_api;
use crate::state::AppState;

/// Body limit for JSON requests.
pub const JSON_BODY_LIMIT: usize = 10 * 1024;

/// Body limit for routes that accept image uploads.
pub const UPLOAD_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// The versioned API, rate limited per client.
pub fn api_router(state: &AppState) -> Router<AppState> {
    let v1 = Router::new()
        .nest("/tours", tours::router())
        .nest("/users", users::router())
        .nest("/reviews", reviews::router());

    Router::new()
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(from_fn_with_state(state.clone(), limit_api))
}
