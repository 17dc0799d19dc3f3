//! Review routes.
//!
//! Mounted at `/api/v1/reviews` and nested under `/api/v1/tours/{tourId}`.
//! When nested, listing is scoped to the tour and new reviews default to it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::MSG_FORBIDDEN;
use crate::middleware::{CurrentUser, SanitizedJson};
use crate::models::{CreateReview, Review, Role, Tour, UpdateReview};
use crate::routes::extract::PathParams;
use crate::state::AppState;

/// Roles that may edit or delete reviews.
const REVIEW_EDITORS: &[Role] = &[Role::User, Role::Admin];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reviews).post(create_review))
        .route(
            "/{id}",
            get(get_review).patch(update_review).delete(delete_review),
        )
}

/// Load a review and check the caller may change it. Admins may change any
/// review; everyone else only their own.
async fn owned_review(state: &AppState, user: &CurrentUser, id: uuid::Uuid) -> AppResult<Review> {
    let review = Review::find_by_id(state.db(), id)
        .await?
        .ok_or_else(AppError::no_document)?;

    if user.role != Role::Admin && review.user_id != user.id {
        return Err(AppError::forbidden(MSG_FORBIDDEN));
    }
    Ok(review)
}

/// List reviews, optionally for one tour.
///
/// GET /api/v1/reviews
/// GET /api/v1/tours/{tourId}/reviews
async fn list_reviews(
    State(state): State<AppState>,
    _user: CurrentUser,
    params: PathParams,
) -> AppResult<Json<Value>> {
    let tour_id = params.optional_uuid("tourId")?;
    let reviews = Review::list(state.db(), tour_id).await?;

    Ok(Json(json!({
        "status": "success",
        "results": reviews.len(),
        "data": { "reviews": reviews },
    })))
}

/// GET /api/v1/reviews/{id}
async fn get_review(
    State(state): State<AppState>,
    _user: CurrentUser,
    params: PathParams,
) -> AppResult<Json<Value>> {
    let id = params.uuid("id")?;
    let review = Review::find_document(state.db(), id)
        .await?
        .ok_or_else(AppError::no_document)?;

    Ok(Json(json!({
        "status": "success",
        "data": { "review": review },
    })))
}

/// Post a review as the current user.
///
/// POST /api/v1/reviews
/// POST /api/v1/tours/{tourId}/reviews
async fn create_review(
    State(state): State<AppState>,
    user: CurrentUser,
    params: PathParams,
    SanitizedJson(input): SanitizedJson<CreateReview>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.restrict_to(&[Role::User])?;

    let route_tour = params.optional_uuid("tourId")?;
    let new_review = input
        .validate(user.id, route_tour)
        .map_err(AppError::Validation)?;

    if !Tour::exists(state.db(), new_review.tour_id).await? {
        return Err(AppError::no_document());
    }

    let review = Review::create(state.db(), &new_review).await?;
    info!(review_id = %review.id, tour_id = %review.tour_id, user_id = %user.id, "review created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "data": { "review": review },
        })),
    ))
}

/// PATCH /api/v1/reviews/{id}
async fn update_review(
    State(state): State<AppState>,
    user: CurrentUser,
    params: PathParams,
    SanitizedJson(mut input): SanitizedJson<UpdateReview>,
) -> AppResult<Json<Value>> {
    user.restrict_to(REVIEW_EDITORS)?;
    let id = params.uuid("id")?;
    owned_review(&state, &user, id).await?;

    input.validate().map_err(AppError::Validation)?;
    let review = Review::update(state.db(), id, &input)
        .await?
        .ok_or_else(AppError::no_document)?;

    Ok(Json(json!({
        "status": "success",
        "data": { "review": review },
    })))
}

/// DELETE /api/v1/reviews/{id}
async fn delete_review(
    State(state): State<AppState>,
    user: CurrentUser,
    params: PathParams,
) -> AppResult<StatusCode> {
    user.restrict_to(REVIEW_EDITORS)?;
    let id = params.uuid("id")?;
    owned_review(&state, &user, id).await?;

    if !Review::delete(state.db(), id).await? {
        return Err(AppError::no_document());
    }
    info!(review_id = %id, user_id = %user.id, "review deleted");

    Ok(StatusCode::NO_CONTENT)
}
