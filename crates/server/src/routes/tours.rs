//! Tour routes.
//!
//! Public reads, role-gated writes, geo queries and reports. Reviews of a
//! tour are served by the nested review router under `/{tourId}/reviews`.

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::handler::Handler;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::middleware::{CurrentUser, RequestTime, SanitizedJson};
use crate::models::geo::{DistanceUnit, LatLng};
use crate::models::tour::{DEFAULT_SORT, TOUR_FIELDS, populate_guides};
use crate::models::{Review, Role, Tour, TourInput};
use crate::query::ListQuery;
use crate::routes::extract::{FormBody, PathParams};
use crate::routes::{UPLOAD_BODY_LIMIT, reviews};
use crate::services::image::{
    TOUR_IMAGE_DIR, TOUR_IMAGE_SIZE, tour_cover_filename, tour_image_filename,
};
use crate::state::AppState;

/// Roles allowed to manage tours.
const TOUR_EDITORS: &[Role] = &[Role::Admin, Role::LeadGuide];

/// Roles allowed to see the monthly plan.
const PLAN_READERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];

/// Query preset behind `/top-5-cheap`.
const TOP_CHEAP_PRESET: &[(&str, &str)] = &[
    ("limit", "5"),
    ("sort", "-ratingsAverage,price"),
    ("fields", "name,price,ratingsAverage,summary,difficulty"),
];

/// File fields accepted on tour updates.
const TOUR_UPLOADS: &[(&str, usize)] = &[("imageCover", 1), ("images", 3)];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tours).post(create_tour))
        .route("/top-5-cheap", get(top_cheap_tours))
        .route("/tour-stats", get(tour_stats))
        .route("/monthly-plan/{year}", get(monthly_plan))
        .route(
            "/tours-within/{distance}/center/{latlng}/unit/{unit}",
            get(tours_within),
        )
        .route("/distances/{latlng}/unit/{unit}", get(tour_distances))
        .route(
            "/{tourId}",
            get(get_tour)
                .patch(update_tour.layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)))
                .delete(delete_tour),
        )
        .nest("/{tourId}/reviews", reviews::router())
}

// =============================================================================
// Reads
// =============================================================================

async fn run_list(
    state: &AppState,
    pairs: &[(String, String)],
    requested_at: Option<Extension<RequestTime>>,
) -> AppResult<Json<Value>> {
    let query = ListQuery::parse(pairs, TOUR_FIELDS, DEFAULT_SORT)?;
    let tours = Tour::list(state.db(), &query).await?;
    let requested_at = requested_at.map_or_else(Utc::now, |Extension(RequestTime(t))| t);

    Ok(Json(json!({
        "status": "success",
        "requestedAt": requested_at,
        "results": tours.len(),
        "data": { "tours": tours },
    })))
}

/// List tours.
///
/// GET /api/v1/tours
async fn list_tours(
    State(state): State<AppState>,
    requested_at: Option<Extension<RequestTime>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    run_list(&state, &pairs, requested_at).await
}

/// The five best-rated, cheapest tours. Client parameters apply first and
/// the preset overrides them.
///
/// GET /api/v1/tours/top-5-cheap
async fn top_cheap_tours(
    State(state): State<AppState>,
    requested_at: Option<Extension<RequestTime>>,
    Query(mut pairs): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    pairs.extend(
        TOP_CHEAP_PRESET
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
    );
    run_list(&state, &pairs, requested_at).await
}

/// Get one tour with its guides and reviews.
///
/// GET /api/v1/tours/{id}
async fn get_tour(State(state): State<AppState>, params: PathParams) -> AppResult<Json<Value>> {
    let id = params.uuid("tourId")?;
    let tour = Tour::find_by_id(state.db(), id)
        .await?
        .ok_or_else(AppError::no_document)?;

    let mut docs = [tour.to_document()];
    populate_guides(state.db(), &mut docs).await?;
    let [mut doc] = docs;

    let reviews = Review::list(state.db(), Some(id)).await?;
    if let Value::Object(map) = &mut doc {
        map.insert(
            "reviews".to_string(),
            serde_json::to_value(reviews).unwrap_or(Value::Array(Vec::new())),
        );
    }

    Ok(Json(json!({
        "status": "success",
        "data": { "tour": doc },
    })))
}

// =============================================================================
// Writes
// =============================================================================

/// Create a tour.
///
/// POST /api/v1/tours
async fn create_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    SanitizedJson(input): SanitizedJson<TourInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.restrict_to(TOUR_EDITORS)?;

    let draft = input.into_draft(None).map_err(AppError::Validation)?;
    let tour = Tour::create(state.db(), &draft).await?;
    info!(tour_id = %tour.id, name = %tour.name, user_id = %user.id, "tour created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "data": { "tour": tour.to_document() },
        })),
    ))
}

/// Update a tour. Accepts JSON, or multipart with `imageCover` and up to
/// three `images`, which are resized before the row is written.
///
/// PATCH /api/v1/tours/{id}
async fn update_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    params: PathParams,
    body: FormBody,
) -> AppResult<Json<Value>> {
    user.restrict_to(TOUR_EDITORS)?;
    let id = params.uuid("tourId")?;

    body.check_files(TOUR_UPLOADS)?;
    let mut input: TourInput = body.parse()?;

    let existing = Tour::find_by_id(state.db(), id)
        .await?
        .ok_or_else(AppError::no_document)?;

    if let Some(cover) = body.files_named("imageCover").next() {
        let filename = state
            .images()
            .store(
                cover.bytes.clone(),
                TOUR_IMAGE_SIZE,
                TOUR_IMAGE_DIR,
                tour_cover_filename(id),
            )
            .await?;
        input.image_cover = Some(filename);
    }

    let uploads: Vec<_> = body.files_named("images").collect();
    if !uploads.is_empty() {
        let mut images = Vec::with_capacity(uploads.len());
        for (index, file) in uploads.into_iter().enumerate() {
            let filename = state
                .images()
                .store(
                    file.bytes.clone(),
                    TOUR_IMAGE_SIZE,
                    TOUR_IMAGE_DIR,
                    tour_image_filename(id, index),
                )
                .await?;
            images.push(filename);
        }
        input.images = Some(images);
    }

    let draft = input
        .into_draft(Some(&existing))
        .map_err(AppError::Validation)?;
    let tour = Tour::update(state.db(), id, &draft)
        .await?
        .ok_or_else(AppError::no_document)?;
    info!(tour_id = %tour.id, user_id = %user.id, "tour updated");

    Ok(Json(json!({
        "status": "success",
        "data": { "tour": tour.to_document() },
    })))
}

/// Delete a tour and its reviews.
///
/// DELETE /api/v1/tours/{id}
async fn delete_tour(
    State(state): State<AppState>,
    user: CurrentUser,
    params: PathParams,
) -> AppResult<StatusCode> {
    user.restrict_to(TOUR_EDITORS)?;
    let id = params.uuid("tourId")?;

    if !Tour::delete(state.db(), id).await? {
        return Err(AppError::no_document());
    }
    info!(tour_id = %id, user_id = %user.id, "tour deleted");

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Reports
// =============================================================================

/// Per-difficulty statistics for tours rated 4.5 and above.
///
/// GET /api/v1/tours/tour-stats
async fn tour_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = Tour::stats(state.db()).await?;

    Ok(Json(json!({
        "status": "success",
        "data": { "stats": stats },
    })))
}

/// Tour starts per month of `year`.
///
/// GET /api/v1/tours/monthly-plan/{year}
async fn monthly_plan(
    State(state): State<AppState>,
    user: CurrentUser,
    params: PathParams,
) -> AppResult<Json<Value>> {
    user.restrict_to(PLAN_READERS)?;

    let raw = params.get("year")?;
    let year: i32 = raw
        .parse()
        .ok()
        .filter(|y| (1..=9999).contains(y))
        .ok_or_else(|| AppError::bad_request(format!("Invalid year: {raw}")))?;

    let plan = Tour::monthly_plan(state.db(), year).await?;

    Ok(Json(json!({
        "status": "success",
        "results": plan.len(),
        "data": { "plan": plan },
    })))
}

fn parse_geo(params: &PathParams) -> AppResult<(LatLng, DistanceUnit)> {
    let center: LatLng = params.get("latlng")?.parse().map_err(AppError::BadRequest)?;
    let unit: DistanceUnit = params.get("unit")?.parse().map_err(AppError::BadRequest)?;
    Ok((center, unit))
}

/// Tours starting within a distance of a point.
///
/// GET /api/v1/tours/tours-within/{distance}/center/{latlng}/unit/{unit}
async fn tours_within(State(state): State<AppState>, params: PathParams) -> AppResult<Json<Value>> {
    let (center, unit) = parse_geo(&params)?;
    let raw = params.get("distance")?;
    let distance: f64 = raw
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::bad_request(format!("Invalid distance: {raw}")))?;

    let tours = Tour::within(state.db(), center, unit.to_radians(distance)).await?;
    let docs: Vec<Value> = tours.iter().map(Tour::to_document).collect();

    Ok(Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": { "data": docs },
    })))
}

/// Distance from a point to every tour's start, nearest first.
///
/// GET /api/v1/tours/distances/{latlng}/unit/{unit}
async fn tour_distances(
    State(state): State<AppState>,
    params: PathParams,
) -> AppResult<Json<Value>> {
    let (origin, unit) = parse_geo(&params)?;
    let distances = Tour::distances(state.db(), origin, unit.meters_multiplier()).await?;

    Ok(Json(json!({
        "status": "success",
        "data": { "data": distances },
    })))
}
