//! Request extractors shared by the resource routers.

use std::collections::HashMap;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::PathRejection;
use axum::extract::{FromRequest, FromRequestParts, Multipart, Path, Request};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::SanitizedJson;
use crate::middleware::sanitize::{clean_string, from_sanitized, sanitize};

/// Rejection for non-image uploads.
pub const NOT_AN_IMAGE: &str = "Please upload only image files (jpeg, png, jpg)";

/// All path parameters of the matched route, including those of parent
/// routers (`tourId` on nested review routes).
#[derive(Debug, Clone)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> AppResult<&str> {
        self.0
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AppError::bad_request(format!("Missing path parameter: {name}")))
    }

    /// Parse a UUID parameter.
    pub fn uuid(&self, name: &str) -> AppResult<Uuid> {
        let raw = self.get(name)?;
        raw.parse()
            .map_err(|_| AppError::bad_request(format!("Invalid id: {raw}")))
    }

    /// Parse a UUID parameter that only some mounts provide.
    pub fn optional_uuid(&self, name: &str) -> AppResult<Option<Uuid>> {
        if self.0.contains_key(name) {
            self.uuid(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for PathParams {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<HashMap<String, String>>::from_request_parts(parts, state).await {
            Ok(Path(params)) => Ok(Self(params)),
            Err(PathRejection::MissingPathParams(_)) => Ok(Self(HashMap::new())),
            Err(rejection) => Err(rejection.into()),
        }
    }
}

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A write body that may be JSON or multipart.
///
/// Multipart text fields are read as JSON when they parse as JSON and as
/// plain strings otherwise, so `price=497` and `name=The Hiker` both work.
#[derive(Debug, Clone, Default)]
pub struct FormBody {
    pub fields: Map<String, Value>,
    pub files: Vec<UploadedFile>,
}

impl FormBody {
    /// Deserialize the text fields.
    pub fn parse<T: DeserializeOwned>(&self) -> AppResult<T> {
        from_sanitized(Value::Object(self.fields.clone()))
    }

    /// Files uploaded under `field`.
    pub fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a UploadedFile> {
        self.files.iter().filter(move |f| f.field == field)
    }

    /// Reject files outside `allowed` (field name, max count).
    pub fn check_files(&self, allowed: &[(&str, usize)]) -> AppResult<()> {
        for file in &self.files {
            let Some((_, max)) = allowed.iter().find(|(name, _)| *name == file.field) else {
                return Err(AppError::bad_request(format!(
                    "Unexpected file field: {}",
                    file.field
                )));
            };
            if self.files_named(&file.field).count() > *max {
                return Err(AppError::bad_request(format!(
                    "Too many files for '{}' (max {max})",
                    file.field
                )));
            }
        }
        Ok(())
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body is too large!".to_string())
    } else {
        AppError::bad_request(e.body_text())
    }
}

fn text_field_value(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => {
            sanitize(value)
        }
        _ => Value::String(clean_string(text)),
    }
}

impl<S: Send + Sync> FromRequest<S> for FormBody {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let SanitizedJson(fields) =
                SanitizedJson::<Map<String, Value>>::from_request(req, state).await?;
            return Ok(Self {
                fields,
                files: Vec::new(),
            });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;

        let mut body = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            if name.starts_with('$') || name.contains('.') {
                continue;
            }

            if field.file_name().is_some() {
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !content_type.starts_with("image") {
                    return Err(AppError::bad_request(NOT_AN_IMAGE));
                }
                let bytes = field.bytes().await.map_err(multipart_error)?;
                body.files.push(UploadedFile {
                    field: name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            } else {
                let text = field.text().await.map_err(multipart_error)?;
                body.fields.insert(name, text_field_value(&text));
            }
        }

        Ok(body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_fields_parse_numbers_and_keep_strings() {
        assert_eq!(text_field_value("497"), json!(497));
        assert_eq!(text_field_value("true"), json!(true));
        assert_eq!(text_field_value("The Forest Hiker"), json!("The Forest Hiker"));
        assert_eq!(text_field_value("\"quoted\""), json!("\"quoted\""));
        assert_eq!(text_field_value("[\"a\",\"b\"]"), json!(["a", "b"]));
    }

    #[test]
    fn file_limits_are_enforced() {
        let file = |field: &str| UploadedFile {
            field: field.to_string(),
            content_type: "image/png".to_string(),
            bytes: Vec::new(),
        };
        let body = FormBody {
            fields: Map::new(),
            files: vec![file("images"), file("images"), file("images"), file("images")],
        };
        assert!(body.check_files(&[("images", 3)]).is_err());

        let body = FormBody {
            fields: Map::new(),
            files: vec![file("imageCover"), file("images")],
        };
        assert!(body.check_files(&[("imageCover", 1), ("images", 3)]).is_ok());
        assert!(body.check_files(&[("photo", 1)]).is_err());
    }

    #[test]
    fn path_params_parse_uuids() {
        let id = Uuid::now_v7();
        let params = PathParams(HashMap::from([("id".to_string(), id.to_string())]));
        assert_eq!(params.uuid("id").unwrap(), id);
        assert_eq!(params.optional_uuid("tourId").unwrap(), None);

        let bad = PathParams(HashMap::from([("tourId".to_string(), "nope".to_string())]));
        assert_eq!(bad.uuid("tourId").unwrap_err().to_string(), "Invalid id: nope");
    }
}
