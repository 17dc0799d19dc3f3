//! Review model.
//!
//! Every write recomputes the affected tour's rating summary in the same
//! transaction as the write itself.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

const REVIEW_COLUMNS: &str = "id, review, rating, created_at, tour_id, user_id";

/// Review documents joined with their author's public fields.
const DOCUMENT_SELECT: &str = r#"
    SELECT r.id, r.review, r.rating, r.created_at, r.tour_id,
           CASE WHEN u.id IS NULL THEN NULL
                ELSE jsonb_build_object('id', u.id, 'name', u.name, 'photo', u.photo)
           END AS author
    FROM reviews r
    LEFT JOIN users u ON u.id = r.user_id AND u.active
"#;

/// Review row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "tour")]
    pub tour_id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
}

/// Author fields embedded in review documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAuthor {
    pub id: Uuid,
    pub name: String,
    pub photo: String,
}

/// A review as served to clients, with its author populated.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDocument {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "tour")]
    pub tour_id: Uuid,
    #[serde(rename = "user")]
    pub author: Option<Json<ReviewAuthor>>,
}

/// Body of a review creation request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateReview {
    pub review: Option<String>,
    pub rating: Option<f64>,
    pub tour: Option<Uuid>,
}

/// A validated review ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub review: String,
    pub rating: f64,
    pub tour_id: Uuid,
    pub user_id: Uuid,
}

/// Fields a review author may change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReview {
    pub review: Option<String>,
    pub rating: Option<f64>,
}

fn check_rating(rating: f64) -> std::result::Result<(), String> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(())
    } else {
        Err(format!(
            "Rating must be between {MIN_RATING} and {MAX_RATING}!"
        ))
    }
}

impl CreateReview {
    /// Validate for `user_id`. The nested route's tour applies when the body
    /// names none.
    pub fn validate(
        self,
        user_id: Uuid,
        route_tour: Option<Uuid>,
    ) -> std::result::Result<NewReview, Vec<String>> {
        let mut errors = Vec::new();

        let review = self.review.map(|r| r.trim().to_string()).unwrap_or_default();
        if review.is_empty() {
            errors.push("Review can not be empty!".to_string());
        }
        match self.rating {
            None => errors.push("A review must have a rating!".to_string()),
            Some(r) => {
                if let Err(e) = check_rating(r) {
                    errors.push(e);
                }
            }
        }
        let tour_id = self.tour.or(route_tour);
        if tour_id.is_none() {
            errors.push("Review must belong to a tour!".to_string());
        }

        match (tour_id, self.rating) {
            (Some(tour_id), Some(rating)) if errors.is_empty() => Ok(NewReview {
                review,
                rating,
                tour_id,
                user_id,
            }),
            _ => Err(errors),
        }
    }
}

impl UpdateReview {
    pub fn validate(&mut self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Some(review) = self.review.as_mut() {
            *review = review.trim().to_string();
            if review.is_empty() {
                errors.push("Review can not be empty!".to_string());
            }
        }
        if let Some(Err(e)) = self.rating.map(check_rating) {
            errors.push(e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl Review {
    /// Raw review row, used for ownership checks.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let review = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch review by id")?;

        Ok(review)
    }

    /// Review document with its author.
    pub async fn find_document(pool: &PgPool, id: Uuid) -> Result<Option<ReviewDocument>> {
        let review =
            sqlx::query_as::<_, ReviewDocument>(&format!("{DOCUMENT_SELECT} WHERE r.id = $1"))
                .bind(id)
                .fetch_optional(pool)
                .await
                .context("failed to fetch review document")?;

        Ok(review)
    }

    /// All reviews, or those of one tour, newest first.
    pub async fn list(pool: &PgPool, tour_id: Option<Uuid>) -> Result<Vec<ReviewDocument>> {
        let reviews = sqlx::query_as::<_, ReviewDocument>(&format!(
            "{DOCUMENT_SELECT} WHERE ($1::uuid IS NULL OR r.tour_id = $1) \
             ORDER BY r.created_at DESC, r.id"
        ))
        .bind(tour_id)
        .fetch_all(pool)
        .await
        .context("failed to list reviews")?;

        Ok(reviews)
    }

    async fn tour_of<'e, E>(executor: E, id: Uuid) -> Result<Option<Uuid>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let tour_id = sqlx::query_scalar("SELECT tour_id FROM reviews WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
            .context("failed to fetch review tour")?;

        Ok(tour_id)
    }

    /// Insert a review and refresh its tour's ratings.
    pub async fn create(pool: &PgPool, input: &NewReview) -> Result<Self> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        lock_tour(&mut *tx, input.tour_id).await?;
        let review = Self::insert(&mut *tx, Uuid::now_v7(), input).await?;

        recompute_ratings(&mut *tx, Some(review.tour_id)).await?;
        tx.commit().await.context("failed to commit review")?;

        tracing::debug!(review_id = %review.id, tour_id = %review.tour_id, "review created");
        Ok(review)
    }

    /// Insert a review row without touching tour ratings. Callers recompute
    /// them afterwards.
    pub async fn insert<'e, E>(executor: E, id: Uuid, input: &NewReview) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let review = sqlx::query_as::<_, Review>(&format!(
            r#"
            INSERT INTO reviews (id, review, rating, tour_id, user_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&input.review)
        .bind(input.rating)
        .bind(input.tour_id)
        .bind(input.user_id)
        .fetch_one(executor)
        .await
        .context("failed to create review")?;

        Ok(review)
    }

    /// Apply a partial update and refresh the tour's ratings.
    pub async fn update(pool: &PgPool, id: Uuid, input: &UpdateReview) -> Result<Option<Self>> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let Some(tour_id) = Self::tour_of(&mut *tx, id).await? else {
            return Ok(None);
        };
        lock_tour(&mut *tx, tour_id).await?;

        let review = sqlx::query_as::<_, Review>(&format!(
            r#"
            UPDATE reviews SET
                review = COALESCE($2, review),
                rating = COALESCE($3, rating)
            WHERE id = $1
            RETURNING {REVIEW_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(input.review.as_deref())
        .bind(input.rating)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update review")?;

        let Some(review) = review else {
            return Ok(None);
        };

        recompute_ratings(&mut *tx, Some(review.tour_id)).await?;
        tx.commit().await.context("failed to commit review")?;

        Ok(Some(review))
    }

    /// Delete a review and refresh the tour's ratings.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let Some(tour_id) = Self::tour_of(&mut *tx, id).await? else {
            return Ok(false);
        };
        lock_tour(&mut *tx, tour_id).await?;

        let deleted = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("failed to delete review")?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        recompute_ratings(&mut *tx, Some(tour_id)).await?;
        tx.commit().await.context("failed to commit review deletion")?;

        Ok(true)
    }
}

/// Take the tour row lock that serializes review writes on one tour.
///
/// Held until the transaction ends, so each recompute sees every review
/// committed before it.
async fn lock_tour<'e, E>(executor: E, tour_id: Uuid) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("SELECT 1 FROM tours WHERE id = $1 FOR UPDATE")
        .bind(tour_id)
        .fetch_optional(executor)
        .await
        .context("failed to lock tour")?;

    Ok(())
}

/// Recompute `ratings_quantity` and `ratings_average` from reviews, for one
/// tour or, with `None`, for all tours.
///
/// Tours without reviews reset to 0 ratings averaging 4.5.
pub async fn recompute_ratings<'e, E>(executor: E, tour_id: Option<Uuid>) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE tours t SET
            ratings_quantity = COALESCE(s.quantity, 0),
            ratings_average = COALESCE(ROUND(s.average, 1)::float8, 4.5)
        FROM tours k
        LEFT JOIN (
            SELECT tour_id, COUNT(*)::int AS quantity, AVG(rating)::numeric AS average
            FROM reviews
            GROUP BY tour_id
        ) s ON s.tour_id = k.id
        WHERE t.id = k.id AND ($1::uuid IS NULL OR t.id = $1)
        "#,
    )
    .bind(tour_id)
    .execute(executor)
    .await
    .context("failed to recompute tour ratings")?;

    Ok(result.rows_affected())
}
