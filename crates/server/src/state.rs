//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::middleware::RateLimiter;
use crate::services::auth::TokenService;
use crate::services::email::EmailService;
use crate::services::image::ImageService;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    config: Config,

    /// Session token signing.
    tokens: TokenService,

    /// SMTP delivery, absent when `SMTP_HOST` is unset.
    email: Option<Arc<EmailService>>,

    /// Upload resizing and storage.
    images: ImageService,

    /// Per-client `/api` request counters.
    rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Connect to PostgreSQL, apply migrations and build all services.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = db::create_pool(config)
            .await
            .context("failed to create database pool")?;

        db::run_migrations(&db)
            .await
            .context("failed to run migrations")?;

        Self::with_pool(config, db)
    }

    /// Build state around an existing pool.
    pub fn with_pool(config: &Config, db: PgPool) -> Result<Self> {
        let email = EmailService::from_config(config)
            .context("failed to configure email service")?
            .map(Arc::new);
        match &config.smtp_host {
            Some(host) => info!(host = %host, "email delivery enabled"),
            None => info!("SMTP_HOST not set, email delivery disabled"),
        }

        let tokens = TokenService::new(config.jwt_secret.as_bytes(), config.jwt_expires_in);
        let images = ImageService::new(&config.public_dir);
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window,
        ));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                db,
                config: config.clone(),
                tokens,
                email,
                images,
                rate_limiter,
            }),
        })
    }

    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn tokens(&self) -> &TokenService {
        &self.inner.tokens
    }

    pub fn email(&self) -> Option<&Arc<EmailService>> {
        self.inner.email.as_ref()
    }

    pub fn images(&self) -> &ImageService {
        &self.inner.images
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.rate_limiter
    }

    /// Check if PostgreSQL is healthy.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }
}
