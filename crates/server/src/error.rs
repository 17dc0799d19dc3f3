//! Application error types.
//!
//! Every handler returns [`AppResult`]. Errors render as `{status, message}`
//! JSON; the [`ErrorReport`] attached to the response lets the
//! error-rendering middleware add debug detail in development.

use std::sync::{Arc, LazyLock};

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use regex::Regex;
use serde_json::json;
use thiserror::Error;

/// Message shown for non-operational failures outside development.
pub const GENERIC_MESSAGE: &str = "Something went wrong!";

/// `Key (col)=(value) already exists.` as reported by PostgreSQL.
static DUPLICATE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Key \((?P<cols>.*?)\)=\((?P<value>.*)\) already exists").ok());

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid input data. {}", .0.join(" "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("internal server error: {0:#}")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// The uniform "no document" error used by every resource.
    pub fn no_document() -> Self {
        Self::NotFound("No document found with that id!".to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Resolve status, client-facing message and whether the error is
    /// operational (safe to show outside development).
    fn classify(&self) -> (StatusCode, String, bool) {
        match self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone(), true),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone(), true),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string(), true),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone(), true),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone(), true),
            AppError::TooManyRequests(m) => (StatusCode::TOO_MANY_REQUESTS, m.clone(), true),
            AppError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone(), true),
            AppError::Database(e) => classify_database(e),
            AppError::Internal(e) => match e.downcast_ref::<sqlx::Error>() {
                Some(db) => classify_database(db),
                None => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"), false),
            },
        }
    }
}

/// Map schema-layer violations to 4xx responses.
fn classify_database(error: &sqlx::Error) -> (StatusCode, String, bool) {
    match error {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "No document found with that id!".to_string(),
            true,
        ),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => (StatusCode::BAD_REQUEST, duplicate_message(db.as_ref()), true),
            Some("23502") | Some("23514") | Some("22P02") => (
                StatusCode::BAD_REQUEST,
                format!("Invalid input data. {}", db.message()),
                true,
            ),
            Some("23503") => (
                StatusCode::NOT_FOUND,
                "Referenced document does not exist!".to_string(),
                true,
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string(), false),
        },
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string(), false),
    }
}

fn duplicate_message(db: &dyn sqlx::error::DatabaseError) -> String {
    let detail = db
        .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
        .and_then(|pg| pg.detail())
        .unwrap_or_default();
    duplicate_message_from_detail(detail)
}

/// Build the duplicate-value message from a PostgreSQL constraint detail.
pub fn duplicate_message_from_detail(detail: &str) -> String {
    let value = DUPLICATE_KEY
        .as_ref()
        .and_then(|re| re.captures(detail))
        .and_then(|caps| caps.name("value"))
        .map(|m| m.as_str().to_string());

    match value {
        Some(value) => format!("Duplicate field value: {value}. Please use another value!"),
        None => "Duplicate field value. Please use another value!".to_string(),
    }
}

/// Details attached to error responses for the error-rendering middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub message: String,
    pub detail: String,
}

/// `"fail"` for client errors, `"error"` for server errors.
pub fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, operational) = self.classify();

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        let public_message = if operational {
            message.clone()
        } else {
            GENERIC_MESSAGE.to_string()
        };

        let mut response = (
            status,
            Json(json!({
                "status": status_label(status),
                "message": public_message,
            })),
        )
            .into_response();

        response.extensions_mut().insert(Arc::new(ErrorReport {
            message,
            detail: format!("{self:?}"),
        }));

        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge("Request body is too large!".to_string())
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
