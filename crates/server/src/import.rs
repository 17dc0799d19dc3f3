//! Development data import and wipe.
//!
//! Reads JSON arrays of tours, users and reviews and inserts them in one
//! transaction, keeping any `id` the file provides so that guides and
//! reviews can reference records from the other files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::review::recompute_ratings;
use crate::models::{CreateReview, CreateUser, Review, Tour, TourInput, User};

/// Files to import. Only tours are required.
#[derive(Debug, Clone)]
pub struct ImportFiles {
    pub tours: PathBuf,
    pub users: Option<PathBuf>,
    pub reviews: Option<PathBuf>,
}

/// Rows written by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub tours: usize,
    pub users: usize,
    pub reviews: usize,
}

#[derive(Debug, Deserialize)]
struct TourRecord {
    id: Option<Uuid>,
    #[serde(flatten)]
    input: TourInput,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: Option<Uuid>,
    #[serde(flatten)]
    input: CreateUser,
}

#[derive(Debug, Deserialize)]
struct ReviewRecord {
    id: Option<Uuid>,
    user: Uuid,
    #[serde(flatten)]
    input: CreateReview,
}

async fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Import the given files. Ratings are recomputed for every tour afterwards.
pub async fn import(pool: &PgPool, files: &ImportFiles) -> Result<ImportSummary> {
    let tours: Vec<TourRecord> = read_records(&files.tours).await?;
    let users: Vec<UserRecord> = match &files.users {
        Some(path) => read_records(path).await?,
        None => Vec::new(),
    };
    let reviews: Vec<ReviewRecord> = match &files.reviews {
        Some(path) => read_records(path).await?,
        None => Vec::new(),
    };

    let mut tx = pool.begin().await.context("failed to begin import")?;

    for (index, record) in users.iter().enumerate() {
        let mut input = record.input.clone();
        if input.password_confirm.is_empty() {
            input.password_confirm = input.password.clone();
        }
        if let Err(errors) = input.validate() {
            bail!("user #{index} ({}) is invalid: {}", input.email, errors.join(" "));
        }
        User::create_with_id(&mut *tx, record.id.unwrap_or_else(Uuid::now_v7), &input).await?;
    }

    let tour_count = tours.len();
    for (index, record) in tours.into_iter().enumerate() {
        let name = record.input.name.clone().unwrap_or_default();
        let draft = match record.input.into_draft(None) {
            Ok(draft) => draft,
            Err(errors) => bail!("tour #{index} ({name}) is invalid: {}", errors.join(" ")),
        };
        Tour::create_with_id(&mut *tx, record.id.unwrap_or_else(Uuid::now_v7), &draft).await?;
    }

    let review_count = reviews.len();
    for (index, record) in reviews.into_iter().enumerate() {
        let new_review = match record.input.validate(record.user, None) {
            Ok(review) => review,
            Err(errors) => bail!("review #{index} is invalid: {}", errors.join(" ")),
        };
        Review::insert(&mut *tx, record.id.unwrap_or_else(Uuid::now_v7), &new_review).await?;
    }

    recompute_ratings(&mut *tx, None).await?;
    tx.commit().await.context("failed to commit import")?;

    let summary = ImportSummary {
        tours: tour_count,
        users: users.len(),
        reviews: review_count,
    };
    info!(
        tours = summary.tours,
        users = summary.users,
        reviews = summary.reviews,
        "data imported"
    );
    Ok(summary)
}

/// Delete every review, tour and user.
pub async fn delete_all(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin delete")?;
    for table in ["reviews", "tours", "users"] {
        let result = sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to delete {table}"))?;
        info!(table, rows = result.rows_affected(), "deleted rows");
    }
    tx.commit().await.context("failed to commit delete")?;
    Ok(())
}
