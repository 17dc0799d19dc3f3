//! Session authentication.
//!
//! [`CurrentUser`] resolves the caller from `Authorization: Bearer <jwt>` or
//! the `jwt` cookie, rejecting with 401 at the first failed check.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use tracing::debug;

use crate::error::AppError;
use crate::models::{Role, User};
use crate::services::auth::TokenError;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "jwt";

/// Value written to the cookie on logout.
pub const LOGGED_OUT: &str = "loggedout";

pub const MSG_NOT_LOGGED_IN: &str = "Please login to access this content!";
pub const MSG_INVALID_TOKEN: &str = "Invalid token. Please log in again!";
pub const MSG_EXPIRED_TOKEN: &str = "Your token has expired! Please log in again.";
pub const MSG_USER_GONE: &str = "The user does no longer exists!";
pub const MSG_PASSWORD_CHANGED: &str = "User recently changed password. Please login again!";
pub const MSG_FORBIDDEN: &str = "You do not have permission to perform this action!";

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    /// 403 unless the caller holds one of `roles`.
    pub fn restrict_to(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.0.role) {
            Ok(())
        } else {
            debug!(user_id = %self.0.id, role = %self.0.role, "role not permitted");
            Err(AppError::forbidden(MSG_FORBIDDEN))
        }
    }
}

impl std::ops::Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

/// Pull a session token from the request headers.
///
/// The bearer header wins over the cookie; the logout placeholder counts as
/// no token.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty() && v != LOGGED_OUT)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            extract_token(&parts.headers).ok_or_else(|| AppError::unauthorized(MSG_NOT_LOGGED_IN))?;

        let claims = state.tokens().verify(&token).map_err(|e| {
            debug!(error = %e, "rejected session token");
            match e {
                TokenError::Expired => AppError::unauthorized(MSG_EXPIRED_TOKEN),
                TokenError::Invalid => AppError::unauthorized(MSG_INVALID_TOKEN),
            }
        })?;

        let user = User::find_by_id(state.db(), claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthorized(MSG_USER_GONE))?;

        if user.changed_password_after(claims.iat) {
            return Err(AppError::unauthorized(MSG_PASSWORD_CHANGED));
        }

        Ok(CurrentUser(user))
    }
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, max_age_days: u32, secure: bool) -> String {
    let max_age = u64::from(max_age_days) * 24 * 60 * 60;
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that replaces the session with a short-lived placeholder.
pub fn logout_cookie(secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={LOGGED_OUT}; Path=/; Max-Age=10; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
