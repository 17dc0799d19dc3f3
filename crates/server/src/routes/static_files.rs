//! Public asset serving and the catch-all 404.
//!
//! Any request no router matched lands here. GET and HEAD requests for a file
//! under the public directory are served; everything else is a JSON 404.

use std::path::Path;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::fs;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

/// Fallback handler for unmatched routes.
pub async fn fallback(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if (method == Method::GET || method == Method::HEAD)
        && let Some(response) = serve_public(&state.config().public_dir, uri.path()).await
    {
        return response;
    }

    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    AppError::not_found(format!("Can't find {target}!")).into_response()
}

async fn serve_public(root: &Path, request_path: &str) -> Option<Response> {
    let path = request_path.trim_start_matches('/');
    // Prevent path traversal
    if path.is_empty() || path.contains("..") || path.contains('\0') || path.contains('\\') {
        return None;
    }

    let file_path = root.join(path);
    let content = match fs::read(&file_path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound && e.kind() != std::io::ErrorKind::IsADirectory {
                warn!(path = %file_path.display(), error = %e, "failed to read public file");
            }
            return None;
        }
    };

    Some(
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, mime_from_path(&file_path)),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            Body::from(content),
        )
            .into_response(),
    )
}

fn mime_from_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("html") => "text/html",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
