//! User model and CRUD operations.
//!
//! Deactivated users (`active = false`) are invisible to every lookup.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::Role;

/// Photo assigned to users who never uploaded one.
pub const DEFAULT_PHOTO: &str = "default.jpg";

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

const USER_COLUMNS: &str =
    "id, name, email, photo, role, password_hash, password_changed_at, active, created_at";

/// User record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub active: bool,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

/// Public projection used when a user is embedded in another document.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub photo: String,
}

/// Input for creating a new user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub photo: Option<String>,
}

impl CreateUser {
    /// Normalize (trim, lowercase email) and validate the input.
    pub fn validate(&mut self) -> std::result::Result<(), Vec<String>> {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_lowercase();

        let mut errors = Vec::new();
        if self.name.is_empty() {
            errors.push("Please tell us your name!".to_string());
        }
        if let Err(e) = validate_email(&self.email) {
            errors.push(e);
        }
        errors.extend(validate_password_pair(&self.password, &self.password_confirm));

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Partial update of a user's profile. Passwords never change here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<Role>,
}

impl UpdateUser {
    /// Normalize and validate the fields that are present.
    pub fn validate(&mut self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(name) = self.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                errors.push("Please tell us your name!".to_string());
            }
        }
        if let Some(email) = self.email.as_mut() {
            *email = email.trim().to_lowercase();
            if let Err(e) = validate_email(email) {
                errors.push(e);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.photo.is_none() && self.role.is_none()
    }
}

/// Check an email address.
pub fn validate_email(email: &str) -> std::result::Result<(), String> {
    if email.is_empty() {
        return Err("Please provide your email!".to_string());
    }
    let valid = EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email));
    if valid {
        Ok(())
    } else {
        Err("Please provide a valid email!".to_string())
    }
}

/// Check a new password and its confirmation.
pub fn validate_password_pair(password: &str, confirm: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if password.is_empty() {
        errors.push("Please provide a password!".to_string());
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "A password must have at least {MIN_PASSWORD_LEN} characters!"
        ));
    }
    if confirm.is_empty() {
        errors.push("Please confirm your password!".to_string());
    } else if password != confirm {
        errors.push("Passwords are not the same!".to_string());
    }
    errors
}

impl User {
    /// Find an active user by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch user by id")?;

        Ok(user)
    }

    /// Find an active user by email (case-insensitive).
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1) AND active"
        ))
        .bind(email.trim())
        .fetch_optional(pool)
        .await
        .context("failed to fetch user by email")?;

        Ok(user)
    }

    /// Create a new user. The input must already be validated.
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<Self> {
        Self::create_with_id(pool, Uuid::now_v7(), input).await
    }

    /// Create a user under a caller-chosen ID (data import).
    pub async fn create_with_id<'e, E>(executor: E, id: Uuid, input: &CreateUser) -> Result<Self>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let hash = hash_password(&input.password)?;
        let role = input.role.unwrap_or_default();
        let photo = input.photo.as_deref().unwrap_or(DEFAULT_PHOTO);

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, photo, role, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(photo)
        .bind(role)
        .bind(&hash)
        .fetch_one(executor)
        .await
        .context("failed to create user")?;

        Ok(user)
    }

    /// Apply a partial profile update. Returns None if the user is gone.
    pub async fn update(pool: &PgPool, id: Uuid, input: &UpdateUser) -> Result<Option<Self>> {
        if input.is_empty() {
            return Self::find_by_id(pool, id).await;
        }

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                photo = COALESCE($4, photo),
                role = COALESCE($5, role)
            WHERE id = $1 AND active
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(input.name.as_deref())
        .bind(input.email.as_deref())
        .bind(input.photo.as_deref())
        .bind(input.role)
        .fetch_optional(pool)
        .await
        .context("failed to update user")?;

        Ok(user)
    }

    /// Replace the user's password and rotate `password_changed_at`.
    ///
    /// The timestamp is backdated by one second so that a token issued
    /// right after the change is not considered stale.
    pub async fn update_password(pool: &PgPool, id: Uuid, new_password: &str) -> Result<Self> {
        let hash = hash_password(new_password)?;
        let changed_at = Utc::now() - Duration::seconds(1);

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET password_hash = $2, password_changed_at = $3
            WHERE id = $1 AND active
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&hash)
        .bind(changed_at)
        .fetch_one(pool)
        .await
        .context("failed to update password")?;

        Ok(user)
    }

    /// Soft-delete: mark the account inactive.
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(pool)
            .await
            .context("failed to deactivate user")?;

        Ok(result.rows_affected() > 0)
    }

    /// List active users.
    pub async fn list(pool: &PgPool) -> Result<Vec<Self>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE active ORDER BY name"
        ))
        .fetch_all(pool)
        .await
        .context("failed to list users")?;

        Ok(users)
    }

    /// Load public summaries for a set of active users.
    pub async fn summaries(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<UserSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT id, name, email, role, photo FROM users WHERE id = ANY($1) AND active",
        )
        .bind(ids)
        .fetch_all(pool)
        .await
        .context("failed to load user summaries")?;

        Ok(users)
    }

    /// Delete a user permanently.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .context("failed to delete user")?;

        Ok(result.rows_affected() > 0)
    }

    /// Verify a password against this user's hash.
    pub fn verify_password(&self, password: &str) -> bool {
        if self.password_hash.is_empty() {
            return false;
        }

        let Ok(parsed_hash) = PasswordHash::new(&self.password_hash) else {
            return false;
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    /// True if the password changed after a token issued at `issued_at`
    /// (Unix seconds).
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .is_some_and(|changed| changed.timestamp() > issued_at)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            photo: self.photo.clone(),
        }
    }
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;

    Ok(hash.to_string())
}
