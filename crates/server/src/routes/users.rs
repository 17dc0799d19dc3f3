//! User routes: authentication, the caller's own account, and admin
//! management.

use axum::extract::{DefaultBodyLimit, State};
use axum::handler::Handler;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{logout_cookie, session_cookie};
use crate::middleware::{CurrentUser, SanitizedJson};
use crate::models::user::validate_password_pair;
use crate::models::{CreateUser, Role, UpdateUser, User};
use crate::routes::UPLOAD_BODY_LIMIT;
use crate::routes::extract::{FormBody, PathParams};
use crate::services::image::{USER_IMAGE_DIR, USER_PHOTO_SIZE, user_photo_filename};
use crate::state::AppState;

const MSG_MISSING_CREDENTIALS: &str = "Please provide email and password!";
const MSG_BAD_CREDENTIALS: &str = "Incorrect email or password!";
const MSG_WRONG_PASSWORD: &str = "Your current password is wrong!";
const MSG_NOT_FOR_PASSWORDS: &str =
    "This route is not for password updates. Please use /update-password.";

/// Profile fields a user may change about themselves.
const SELF_EDITABLE: &[&str] = &["name", "email"];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/me", get(get_me))
        .route(
            "/update-me",
            patch(update_me.layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))),
        )
        .route("/update-password", patch(update_password))
        .route("/delete-me", delete(delete_me))
        .route("/", get(list_users).post(create_user))
        .route(
            "/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest {
    #[serde(default)]
    password_current: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    password_confirm: String,
}

// =============================================================================
// Authentication
// =============================================================================

/// Sign a token for `user` and return it in the body and the `jwt` cookie.
fn send_token(state: &AppState, user: &User, status: StatusCode) -> AppResult<Response> {
    let token = state.tokens().sign(user.id)?;
    let config = state.config();
    let cookie = session_cookie(
        &token,
        config.jwt_cookie_expires_in_days,
        !config.environment.is_development(),
    );
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid session cookie: {e}")))?;

    let body = Json(json!({
        "status": "success",
        "token": token,
        "data": { "user": user },
    }));

    Ok((status, [(SET_COOKIE, cookie)], body).into_response())
}

/// Register a new account with the `user` role.
///
/// POST /api/v1/users/signup
async fn signup(
    State(state): State<AppState>,
    SanitizedJson(mut input): SanitizedJson<CreateUser>,
) -> AppResult<Response> {
    input.role = None;
    input.photo = None;
    input.validate().map_err(AppError::Validation)?;

    let user = User::create(state.db(), &input).await?;
    info!(user_id = %user.id, "user signed up");

    if let Some(email) = state.email().cloned() {
        let to = user.email.clone();
        let name = user.name.clone();
        tokio::spawn(async move {
            if let Err(e) = email.send_welcome(&to, &name).await {
                warn!(error = %e, to = %to, "failed to send welcome email");
            }
        });
    }

    send_token(&state, &user, StatusCode::CREATED)
}

/// POST /api/v1/users/login
async fn login(
    State(state): State<AppState>,
    SanitizedJson(input): SanitizedJson<LoginRequest>,
) -> AppResult<Response> {
    let (Some(email), Some(password)) = (
        input.email.filter(|e| !e.trim().is_empty()),
        input.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request(MSG_MISSING_CREDENTIALS));
    };

    let user = User::find_by_email(state.db(), &email).await?;
    let Some(user) = user.filter(|u| u.verify_password(&password)) else {
        info!("failed login attempt");
        return Err(AppError::unauthorized(MSG_BAD_CREDENTIALS));
    };

    info!(user_id = %user.id, "user logged in");
    send_token(&state, &user, StatusCode::OK)
}

/// Replace the session cookie with a placeholder that expires in seconds.
///
/// GET /api/v1/users/logout
async fn logout(State(state): State<AppState>) -> AppResult<Response> {
    let cookie = logout_cookie(!state.config().environment.is_development());
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid logout cookie: {e}")))?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(json!({ "status": "success" })),
    )
        .into_response())
}

// =============================================================================
// Own account
// =============================================================================

/// GET /api/v1/users/me
async fn get_me(user: CurrentUser) -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "data": { "user": user.0 },
    }))
}

/// Change name, email or photo. Multipart bodies may carry a `photo` file.
///
/// PATCH /api/v1/users/update-me
async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    mut body: FormBody,
) -> AppResult<Json<serde_json::Value>> {
    if body.fields.contains_key("password") || body.fields.contains_key("passwordConfirm") {
        return Err(AppError::bad_request(MSG_NOT_FOR_PASSWORDS));
    }
    body.check_files(&[("photo", 1)])?;
    body.fields.retain(|key, _| SELF_EDITABLE.contains(&key.as_str()));

    let mut input: UpdateUser = body.parse()?;
    if let Some(photo) = body.files_named("photo").next() {
        let filename = state
            .images()
            .store(
                photo.bytes.clone(),
                USER_PHOTO_SIZE,
                USER_IMAGE_DIR,
                user_photo_filename(user.id),
            )
            .await?;
        input.photo = Some(filename);
    }
    input.validate().map_err(AppError::Validation)?;

    let updated = User::update(state.db(), user.id, &input)
        .await?
        .ok_or_else(AppError::no_document)?;

    Ok(Json(json!({
        "status": "success",
        "data": { "user": updated },
    })))
}

/// Change the caller's password and issue a fresh token.
///
/// PATCH /api/v1/users/update-password
async fn update_password(
    State(state): State<AppState>,
    user: CurrentUser,
    SanitizedJson(input): SanitizedJson<UpdatePasswordRequest>,
) -> AppResult<Response> {
    if !user.verify_password(&input.password_current) {
        return Err(AppError::unauthorized(MSG_WRONG_PASSWORD));
    }

    let errors = validate_password_pair(&input.password, &input.password_confirm);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let updated = User::update_password(state.db(), user.id, &input.password).await?;
    info!(user_id = %updated.id, "password changed");

    send_token(&state, &updated, StatusCode::OK)
}

/// Deactivate the caller's account.
///
/// DELETE /api/v1/users/delete-me
async fn delete_me(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    User::deactivate(state.db(), user.id).await?;
    info!(user_id = %user.id, "user deactivated");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Admin
// =============================================================================

/// GET /api/v1/users
async fn list_users(
    State(state): State<AppState>,
    admin: CurrentUser,
) -> AppResult<Json<serde_json::Value>> {
    admin.restrict_to(&[Role::Admin])?;
    let users = User::list(state.db()).await?;

    Ok(Json(json!({
        "status": "success",
        "results": users.len(),
        "data": { "users": users },
    })))
}

/// POST /api/v1/users
async fn create_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    SanitizedJson(mut input): SanitizedJson<CreateUser>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    admin.restrict_to(&[Role::Admin])?;
    input.validate().map_err(AppError::Validation)?;

    let user = User::create(state.db(), &input).await?;
    info!(user_id = %user.id, admin_id = %admin.id, role = %user.role, "user created by admin");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "data": { "user": user },
        })),
    ))
}

/// GET /api/v1/users/{id}
async fn get_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    params: PathParams,
) -> AppResult<Json<serde_json::Value>> {
    admin.restrict_to(&[Role::Admin])?;
    let user = User::find_by_id(state.db(), params.uuid("id")?)
        .await?
        .ok_or_else(AppError::no_document)?;

    Ok(Json(json!({
        "status": "success",
        "data": { "user": user },
    })))
}

/// PATCH /api/v1/users/{id}
async fn update_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    params: PathParams,
    SanitizedJson(mut input): SanitizedJson<UpdateUser>,
) -> AppResult<Json<serde_json::Value>> {
    admin.restrict_to(&[Role::Admin])?;
    let id = params.uuid("id")?;
    input.validate().map_err(AppError::Validation)?;

    let user = User::update(state.db(), id, &input)
        .await?
        .ok_or_else(AppError::no_document)?;
    info!(user_id = %user.id, admin_id = %admin.id, "user updated by admin");

    Ok(Json(json!({
        "status": "success",
        "data": { "user": user },
    })))
}

/// DELETE /api/v1/users/{id}
async fn delete_user(
    State(state): State<AppState>,
    admin: CurrentUser,
    params: PathParams,
) -> AppResult<StatusCode> {
    admin.restrict_to(&[Role::Admin])?;
    let id = params.uuid("id")?;

    if !User::delete(state.db(), id).await? {
        return Err(AppError::no_document());
    }
    info!(user_id = %id, admin_id = %admin.id, "user deleted");

    Ok(StatusCode::NO_CONTENT)
}
