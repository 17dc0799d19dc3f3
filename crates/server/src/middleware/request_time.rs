//! Stamps each request with the time it arrived.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};

/// Arrival time of the current request.
#[derive(Debug, Clone, Copy)]
pub struct RequestTime(pub DateTime<Utc>);

pub async fn stamp_request_time(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(RequestTime(Utc::now()));
    next.run(request).await
}
