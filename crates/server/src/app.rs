//! Router assembly.
//!
//! Layer order, outermost first: tracing, CORS, panic recovery, security
//! headers, error rendering, request timestamps. The `/api` subtree adds
//! rate limiting and the JSON body limit.

use std::any::Any;

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::middleware::error_render::render_errors;
use crate::middleware::request_time::stamp_request_time;
use crate::middleware::security_headers::set_security_headers;
use crate::routes::{self, health, static_files};
use crate::state::AppState;

/// Build the complete application router.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(state.config());

    Router::new()
        .merge(health::router())
        .nest("/api", routes::api_router(&state))
        .fallback(static_files::fallback)
        .layer(from_fn(stamp_request_time))
        .layer(from_fn_with_state(state.clone(), render_errors))
        .layer(from_fn(set_security_headers))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %message, "handler panicked");

    AppError::Internal(anyhow::anyhow!("handler panicked: {message}")).into_response()
}

/// CORS from `CORS_ALLOWED_ORIGINS`: `*` allows any origin without
/// credentials, an explicit list allows credentials.
pub fn build_cors_layer(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if config.cors_allowed_origins.len() == 1 && config.cors_allowed_origins[0] == "*" {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        // Credentialed CORS cannot use wildcard headers.
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_credentials(true)
    }
}
