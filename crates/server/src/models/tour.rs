//! Tour model, validation and reporting queries.
//!
//! Secret tours are excluded from the find queries (list and within).
//! Lookups by id and aggregations see all tours.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::User;
use super::geo::{self, GeoPoint, LatLng, Location};
use crate::query::{FieldKind, FieldSpec, ListQuery, ListQueryBuilder};

pub const MIN_NAME_LEN: usize = 10;
pub const MAX_NAME_LEN: usize = 40;
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;
pub const DIFFICULTIES: &[&str] = &["easy", "medium", "difficult"];

/// Default list ordering: newest first.
pub const DEFAULT_SORT: &str = "-createdAt";

const TOUR_COLUMNS: &str = "id, name, slug, duration, max_group_size, difficulty, \
    ratings_average, ratings_quantity, price, price_discount, summary, description, \
    image_cover, images, created_at, start_dates, secret_tour, start_location, locations, guides";

const fn field(
    name: &'static str,
    column: &'static str,
    kind: FieldKind,
    filterable: bool,
    multi_value: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        column,
        kind,
        filterable,
        sortable: filterable,
        default_visible: true,
        multi_value,
    }
}

/// Fields exposed by the tour list endpoint.
pub static TOUR_FIELDS: &[FieldSpec] = &[
    field("id", "id", FieldKind::Other, false, false),
    field("name", "name", FieldKind::Text, true, false),
    field("slug", "slug", FieldKind::Text, true, false),
    field("duration", "duration", FieldKind::Number, true, true),
    field("maxGroupSize", "max_group_size", FieldKind::Number, true, true),
    field("difficulty", "difficulty", FieldKind::Text, true, true),
    field("ratingsAverage", "ratings_average", FieldKind::Number, true, true),
    field("ratingsQuantity", "ratings_quantity", FieldKind::Number, true, true),
    field("price", "price", FieldKind::Number, true, true),
    field("priceDiscount", "price_discount", FieldKind::Number, true, false),
    field("summary", "summary", FieldKind::Text, false, false),
    field("description", "description", FieldKind::Text, false, false),
    field("imageCover", "image_cover", FieldKind::Text, false, false),
    field("images", "images", FieldKind::Other, false, false),
    FieldSpec {
        name: "createdAt",
        column: "created_at",
        kind: FieldKind::Other,
        filterable: false,
        sortable: true,
        default_visible: false,
        multi_value: false,
    },
    field("startDates", "start_dates", FieldKind::Other, false, false),
    field("secretTour", "secret_tour", FieldKind::Other, false, false),
    field("startLocation", "start_location", FieldKind::Other, false, false),
    field("locations", "locations", FieldKind::Other, false, false),
    field("guides", "guides", FieldKind::Other, false, false),
];

/// Tour record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret_tour: bool,
    pub start_location: Option<Json<GeoPoint>>,
    pub locations: Json<Vec<Location>>,
    pub guides: Vec<Uuid>,
}

/// Tour fields accepted on create and update. Absent fields keep their
/// current value on update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourInput {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<Location>>,
    pub guides: Option<Vec<Uuid>>,
}

/// A complete, validated set of tour fields ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct TourDraft {
    pub name: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret_tour: bool,
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<Location>,
    pub guides: Vec<Uuid>,
}

impl From<&Tour> for TourDraft {
    fn from(tour: &Tour) -> Self {
        Self {
            name: tour.name.clone(),
            duration: tour.duration,
            max_group_size: tour.max_group_size,
            difficulty: tour.difficulty.clone(),
            ratings_average: tour.ratings_average,
            ratings_quantity: tour.ratings_quantity,
            price: tour.price,
            price_discount: tour.price_discount,
            summary: tour.summary.clone(),
            description: tour.description.clone(),
            image_cover: tour.image_cover.clone(),
            images: tour.images.clone(),
            start_dates: tour.start_dates.clone(),
            secret_tour: tour.secret_tour,
            start_location: tour.start_location.as_ref().map(|p| p.0.clone()),
            locations: tour.locations.0.clone(),
            guides: tour.guides.clone(),
        }
    }
}

fn required<T>(value: Option<T>, message: &str, errors: &mut Vec<String>) -> Option<T> {
    if value.is_none() {
        errors.push(message.to_string());
    }
    value
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string())
}

/// Round to one decimal place, as ratings are stored.
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl TourInput {
    /// Merge onto `base` (for updates) and validate the result.
    pub fn into_draft(self, base: Option<&Tour>) -> std::result::Result<TourDraft, Vec<String>> {
        let base = base.map(TourDraft::from);
        let mut errors = Vec::new();

        let name = trimmed(self.name).or_else(|| base.as_ref().map(|b| b.name.clone()));
        let duration = self.duration.or(base.as_ref().map(|b| b.duration));
        let max_group_size = self.max_group_size.or(base.as_ref().map(|b| b.max_group_size));
        let difficulty =
            trimmed(self.difficulty).or_else(|| base.as_ref().map(|b| b.difficulty.clone()));
        let price = self.price.or(base.as_ref().map(|b| b.price));
        let image_cover =
            trimmed(self.image_cover).or_else(|| base.as_ref().map(|b| b.image_cover.clone()));

        let name = required(name, "A tour must have a name!", &mut errors);
        let duration = required(duration, "A tour must have a duration!", &mut errors);
        let max_group_size =
            required(max_group_size, "A tour must have a group size!", &mut errors);
        let difficulty = required(difficulty, "A tour must have a difficulty!", &mut errors);
        let price = required(price, "A tour must have a price!", &mut errors);
        let image_cover = required(image_cover, "A tour must have a cover image!", &mut errors);

        let ratings_average = self
            .ratings_average
            .or(base.as_ref().map(|b| b.ratings_average))
            .unwrap_or(DEFAULT_RATINGS_AVERAGE);
        let ratings_quantity = self
            .ratings_quantity
            .or(base.as_ref().map(|b| b.ratings_quantity))
            .unwrap_or(0);
        let price_discount = self
            .price_discount
            .or(base.as_ref().and_then(|b| b.price_discount));

        if let Some(name) = &name {
            let len = name.chars().count();
            if len > MAX_NAME_LEN {
                errors.push(format!(
                    "A tour name must have less or equal than {MAX_NAME_LEN} characters!"
                ));
            } else if len < MIN_NAME_LEN {
                errors.push(format!(
                    "A tour name must have more or equal than {MIN_NAME_LEN} characters!"
                ));
            }
        }
        if duration.is_some_and(|d| d <= 0) {
            errors.push("A tour duration must be positive!".to_string());
        }
        if max_group_size.is_some_and(|g| g <= 0) {
            errors.push("A tour group size must be positive!".to_string());
        }
        if difficulty
            .as_deref()
            .is_some_and(|d| !DIFFICULTIES.contains(&d))
        {
            errors.push("Difficulty is either: easy, medium, difficult!".to_string());
        }
        if ratings_average < 1.0 {
            errors.push("Rating must be above 1.0!".to_string());
        } else if ratings_average > 5.0 {
            errors.push("Rating must be below 5.0!".to_string());
        }
        if ratings_quantity < 0 {
            errors.push("Ratings quantity cannot be negative!".to_string());
        }
        if price.is_some_and(|p| p < 0.0) {
            errors.push("A tour price cannot be negative!".to_string());
        }
        if let (Some(discount), Some(price)) = (price_discount, price)
            && discount >= price
        {
            errors.push(format!(
                "Discount price ({discount}) should be below regular price!"
            ));
        }

        let start_location = self
            .start_location
            .or_else(|| base.as_ref().and_then(|b| b.start_location.clone()));
        if let Some(Err(e)) = start_location.as_ref().map(GeoPoint::validate) {
            errors.push(e);
        }
        let locations = self
            .locations
            .or_else(|| base.as_ref().map(|b| b.locations.clone()))
            .unwrap_or_default();
        for location in &locations {
            if let Err(e) = location.validate() {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let (
            Some(name),
            Some(duration),
            Some(max_group_size),
            Some(difficulty),
            Some(price),
            Some(image_cover),
        ) = (name, duration, max_group_size, difficulty, price, image_cover)
        else {
            return Err(errors);
        };

        Ok(TourDraft {
            name,
            duration,
            max_group_size,
            difficulty,
            ratings_average: round_rating(ratings_average),
            ratings_quantity,
            price,
            price_discount,
            summary: trimmed(self.summary)
                .or_else(|| base.as_ref().and_then(|b| b.summary.clone())),
            description: trimmed(self.description)
                .or_else(|| base.as_ref().and_then(|b| b.description.clone())),
            image_cover,
            images: self
                .images
                .or_else(|| base.as_ref().map(|b| b.images.clone()))
                .unwrap_or_default(),
            start_dates: self
                .start_dates
                .or_else(|| base.as_ref().map(|b| b.start_dates.clone()))
                .unwrap_or_default(),
            secret_tour: self
                .secret_tour
                .or(base.as_ref().map(|b| b.secret_tour))
                .unwrap_or(false),
            start_location,
            locations,
            guides: self
                .guides
                .or_else(|| base.as_ref().map(|b| b.guides.clone()))
                .unwrap_or_default(),
        })
    }
}

/// Generate a URL slug from a tour name.
///
/// Lowercases, replaces runs of non-alphanumerics with one hyphen and trims
/// hyphens from both ends.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

/// One row of the difficulty report.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TourStats {
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Tour starts in one month of a year.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Distance from a point to a tour's start location.
#[derive(Debug, Clone, Serialize)]
pub struct TourDistance {
    pub id: Uuid,
    pub name: String,
    pub distance: f64,
}

impl Tour {
    /// Weeks, derived from the duration in days.
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }

    /// Serialize with virtual fields.
    pub fn to_document(&self) -> Value {
        let mut doc = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut doc {
            map.insert("durationWeeks".to_string(), Value::from(self.duration_weeks()));
        }
        doc
    }

    /// Find a tour by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let tour =
            sqlx::query_as::<_, Tour>(&format!("SELECT {TOUR_COLUMNS} FROM tours WHERE id = $1"))
                .bind(id)
                .fetch_optional(pool)
                .await
                .context("failed to fetch tour by id")?;

        Ok(tour)
    }

    /// True if a tour with this ID exists, secret or not.
    pub async fn exists(pool: &PgPool, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tours WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
            .context("failed to check tour existence")?;

        Ok(exists)
    }

    /// Run a parsed list query. Rows come back as projected JSON documents.
    pub async fn list(pool: &PgPool, query: &ListQuery) -> Result<Vec<Value>> {
        // The builder holds non-Send expressions; drop it before awaiting.
        let sql = {
            let builder = ListQueryBuilder::new("tours", query);
            let not_secret = builder.column("secret_tour").eq(false);
            builder.with_condition(not_secret).build()
        };

        let mut docs: Vec<Value> = sqlx::query_scalar(&sql)
            .fetch_all(pool)
            .await
            .context("failed to list tours")?;

        for doc in &mut docs {
            if let Some(duration) = doc.get("duration").and_then(Value::as_f64)
                && let Value::Object(map) = doc
            {
                map.insert("durationWeeks".to_string(), Value::from(duration / 7.0));
            }
        }

        if query.selects("guides") {
            populate_guides(pool, &mut docs).await?;
        }

        Ok(docs)
    }

    /// Insert a new tour.
    pub async fn create(pool: &PgPool, draft: &TourDraft) -> Result<Self> {
        Self::create_with_id(pool, Uuid::now_v7(), draft).await
    }

    /// Insert a tour under a caller-chosen ID (data import).
    pub async fn create_with_id<'e, E>(executor: E, id: Uuid, draft: &TourDraft) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let tour = sqlx::query_as::<_, Tour>(&format!(
            r#"
            INSERT INTO tours (
                id, name, slug, duration, max_group_size, difficulty,
                ratings_average, ratings_quantity, price, price_discount,
                summary, description, image_cover, images, start_dates,
                secret_tour, start_location, locations, guides
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {TOUR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&draft.name)
        .bind(slugify(&draft.name))
        .bind(draft.duration)
        .bind(draft.max_group_size)
        .bind(&draft.difficulty)
        .bind(draft.ratings_average)
        .bind(draft.ratings_quantity)
        .bind(draft.price)
        .bind(draft.price_discount)
        .bind(draft.summary.as_deref())
        .bind(draft.description.as_deref())
        .bind(&draft.image_cover)
        .bind(&draft.images)
        .bind(&draft.start_dates)
        .bind(draft.secret_tour)
        .bind(draft.start_location.as_ref().map(Json))
        .bind(Json(&draft.locations))
        .bind(&draft.guides)
        .fetch_one(executor)
        .await
        .context("failed to create tour")?;

        Ok(tour)
    }

    /// Overwrite a tour with a validated draft. Returns None if it is gone.
    pub async fn update(pool: &PgPool, id: Uuid, draft: &TourDraft) -> Result<Option<Self>> {
        let tour = sqlx::query_as::<_, Tour>(&format!(
            r#"
            UPDATE tours SET
                name = $2, slug = $3, duration = $4, max_group_size = $5,
                difficulty = $6, ratings_average = $7, ratings_quantity = $8,
                price = $9, price_discount = $10, summary = $11, description = $12,
                image_cover = $13, images = $14, start_dates = $15,
                secret_tour = $16, start_location = $17, locations = $18, guides = $19
            WHERE id = $1
            RETURNING {TOUR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&draft.name)
        .bind(slugify(&draft.name))
        .bind(draft.duration)
        .bind(draft.max_group_size)
        .bind(&draft.difficulty)
        .bind(draft.ratings_average)
        .bind(draft.ratings_quantity)
        .bind(draft.price)
        .bind(draft.price_discount)
        .bind(draft.summary.as_deref())
        .bind(draft.description.as_deref())
        .bind(&draft.image_cover)
        .bind(&draft.images)
        .bind(&draft.start_dates)
        .bind(draft.secret_tour)
        .bind(draft.start_location.as_ref().map(Json))
        .bind(Json(&draft.locations))
        .bind(&draft.guides)
        .fetch_optional(pool)
        .await
        .context("failed to update tour")?;

        Ok(tour)
    }

    /// Delete a tour. Its reviews go with it.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tours WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .context("failed to delete tour")?;

        Ok(result.rows_affected() > 0)
    }

    /// Per-difficulty statistics over well-rated tours.
    pub async fn stats(pool: &PgPool) -> Result<Vec<TourStats>> {
        let stats = sqlx::query_as::<_, TourStats>(
            r#"
            SELECT
                UPPER(difficulty) AS difficulty,
                COUNT(*) AS num_tours,
                COALESCE(SUM(ratings_quantity), 0)::BIGINT AS num_ratings,
                AVG(ratings_average) AS avg_rating,
                AVG(price) AS avg_price,
                MIN(price) AS min_price,
                MAX(price) AS max_price
            FROM tours
            WHERE ratings_average >= 4.5
            GROUP BY UPPER(difficulty)
            ORDER BY avg_price ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .context("failed to compute tour stats")?;

        Ok(stats)
    }

    /// Tour starts per month for a calendar year, busiest month first.
    pub async fn monthly_plan(pool: &PgPool, year: i32) -> Result<Vec<MonthlyPlan>> {
        let (Some(from), Some(to)) = (
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single(),
            Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single(),
        ) else {
            anyhow::bail!("year {year} is out of range");
        };

        let plan = sqlx::query_as::<_, MonthlyPlan>(
            r#"
            SELECT
                EXTRACT(MONTH FROM s.start_date)::INT AS month,
                COUNT(*) AS num_tour_starts,
                ARRAY_AGG(t.name ORDER BY t.name) AS tours
            FROM tours t
            CROSS JOIN LATERAL UNNEST(t.start_dates) AS s(start_date)
            WHERE s.start_date >= $1 AND s.start_date < $2
            GROUP BY 1
            ORDER BY num_tour_starts DESC, month ASC
            LIMIT 12
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
        .context("failed to compute monthly plan")?;

        Ok(plan)
    }

    /// Non-secret tours starting within `radius` radians of `center`.
    pub async fn within(pool: &PgPool, center: LatLng, radius: f64) -> Result<Vec<Self>> {
        let angle = geo::central_angle_sql(1, 2);
        let tours = sqlx::query_as::<_, Tour>(&format!(
            r#"
            SELECT {TOUR_COLUMNS} FROM tours
            WHERE NOT secret_tour
              AND jsonb_typeof(start_location->'coordinates') = 'array'
              AND {angle} <= $3
            ORDER BY name
            "#
        ))
        .bind(center.lat)
        .bind(center.lng)
        .bind(radius)
        .fetch_all(pool)
        .await
        .context("failed to query tours within radius")?;

        Ok(tours)
    }

    /// Distance from `origin` to every tour with a start location, nearest
    /// first. `multiplier` converts metres into the requested unit.
    pub async fn distances(
        pool: &PgPool,
        origin: LatLng,
        multiplier: f64,
    ) -> Result<Vec<TourDistance>> {
        let rows: Vec<(Uuid, String, Json<GeoPoint>)> = sqlx::query_as(
            "SELECT id, name, start_location FROM tours \
             WHERE jsonb_typeof(start_location->'coordinates') = 'array'",
        )
        .fetch_all(pool)
        .await
        .context("failed to load tour start locations")?;

        let mut distances: Vec<TourDistance> = rows
            .into_iter()
            .filter_map(|(id, name, Json(point))| {
                let &[lng, lat] = point.coordinates.as_slice() else {
                    return None;
                };
                let angle = geo::central_angle(origin, LatLng { lat, lng });
                Some(TourDistance {
                    id,
                    name,
                    distance: angle * geo::EARTH_RADIUS_M * multiplier,
                })
            })
            .collect();

        distances.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(distances)
    }
}

/// Replace `guides` ID arrays with user summaries, preserving order.
pub async fn populate_guides(pool: &PgPool, docs: &mut [Value]) -> Result<()> {
    let mut ids: Vec<Uuid> = docs
        .iter()
        .filter_map(|doc| doc.get("guides").and_then(Value::as_array))
        .flatten()
        .filter_map(|id| id.as_str().and_then(|s| s.parse().ok()))
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let summaries: HashMap<Uuid, Value> = User::summaries(pool, &ids)
        .await?
        .into_iter()
        .map(|s| (s.id, serde_json::to_value(&s).unwrap_or(Value::Null)))
        .collect();

    for doc in docs.iter_mut() {
        let Some(guides) = doc.get_mut("guides") else {
            continue;
        };
        let populated: Vec<Value> = guides
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|id| id.as_str().and_then(|s| s.parse::<Uuid>().ok()))
                    .filter_map(|id| summaries.get(&id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        *guides = Value::Array(populated);
    }

    Ok(())
}
