//! JSON body sanitisation.
//!
//! Strips operator-like keys (leading `$` or containing `.`) and removes
//! HTML markup from string values before a body reaches a handler.

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;

/// A JSON body that has been sanitised and then deserialized into `T`.
#[derive(Debug, Clone)]
pub struct SanitizedJson<T>(pub T);

impl<S, T> FromRequest<S> for SanitizedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state).await?;
        from_sanitized(value).map(SanitizedJson)
    }
}

/// Sanitise `value` and deserialize it.
pub fn from_sanitized<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    serde_json::from_value(sanitize(value))
        .map_err(|e| AppError::bad_request(format!("Invalid input data. {e}")))
}

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Remove markup from a string. Plain text passes through untouched.
pub fn clean_string(s: &str) -> String {
    if s.contains('<') || s.contains('>') {
        ammonia::clean(s)
    } else {
        s.to_string()
    }
}

/// Recursively sanitise a JSON value.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter(|(k, _)| !is_operator_key(k))
                .map(|(k, v)| (k, sanitize(v)))
                .collect();
            Value::Object(cleaned)
        }
        other => other,
    }
}
