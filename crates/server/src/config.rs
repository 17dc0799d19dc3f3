//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Minimum accepted length of `JWT_SECRET` in bytes.
const MIN_JWT_SECRET_LEN: usize = 32;

/// Deployment environment, selects how much error detail is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => bail!("APP_ENV must be 'development' or 'production', got '{other}'"),
        }
    }

    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment (default: development).
    pub environment: Environment,

    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// HMAC secret used to sign bearer tokens.
    pub jwt_secret: String,

    /// Token lifetime (default: 90 days).
    pub jwt_expires_in: Duration,

    /// Lifetime of the `jwt` cookie in days (default: 90).
    pub jwt_cookie_expires_in_days: u32,

    /// Directory served as static files; uploads land in `img/` below it.
    pub public_dir: PathBuf,

    /// Requests allowed per client and window on `/api` (default: 200).
    pub rate_limit_max: u32,

    /// Rate limit window (default: one hour).
    pub rate_limit_window: Duration,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    /// (default: false). Enable only behind a proxy that sets them.
    pub trust_proxy: bool,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// SMTP host for email delivery. When None, email is disabled.
    pub smtp_host: Option<String>,

    /// SMTP port (default: 587).
    pub smtp_port: u16,

    /// SMTP username for authentication.
    pub smtp_username: Option<String>,

    /// SMTP password for authentication.
    pub smtp_password: Option<String>,

    /// SMTP encryption mode: "starttls" (default), "tls", or "none".
    pub smtp_encryption: String,

    /// From address for outgoing email.
    pub smtp_from_email: String,

    /// Public site URL for constructing links in emails.
    pub site_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::parse(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        )?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let jwt_secret =
            env::var("JWT_SECRET").context("JWT_SECRET environment variable is required")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes");
        }

        let jwt_expires_in =
            parse_duration(&env::var("JWT_EXPIRES_IN").unwrap_or_else(|_| "90d".to_string()))
                .context("JWT_EXPIRES_IN must look like 90d, 12h, 30m or 3600s")?;

        let jwt_cookie_expires_in_days = env::var("JWT_COOKIE_EXPIRES_IN")
            .unwrap_or_else(|_| "90".to_string())
            .parse()
            .context("JWT_COOKIE_EXPIRES_IN must be a number of days")?;

        let public_dir = env::var("PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./public"));

        let rate_limit_max = env::var("RATE_LIMIT_MAX")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .context("RATE_LIMIT_MAX must be a valid u32")?;

        let rate_limit_window = env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("RATE_LIMIT_WINDOW_SECS must be a number of seconds")?;

        let trust_proxy = env::var("TRUST_PROXY")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .context("TRUST_PROXY must be true or false")?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let smtp_host = env::var("SMTP_HOST").ok().filter(|h| !h.is_empty());

        let smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .context("SMTP_PORT must be a valid u16")?;

        let smtp_username = env::var("SMTP_USERNAME").ok();
        let smtp_password = env::var("SMTP_PASSWORD").ok();

        let smtp_encryption = env::var("SMTP_ENCRYPTION")
            .unwrap_or_else(|_| "starttls".to_string())
            .to_lowercase();

        let smtp_from_email =
            env::var("SMTP_FROM_EMAIL").unwrap_or_else(|_| "noreply@localhost".to_string());

        let site_url = env::var("SITE_URL").unwrap_or_else(|_| format!("http://localhost:{port}"));

        Ok(Self {
            environment,
            port,
            database_url,
            database_max_connections,
            jwt_secret,
            jwt_expires_in,
            jwt_cookie_expires_in_days,
            public_dir,
            rate_limit_max,
            rate_limit_window,
            trust_proxy,
            cors_allowed_origins,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            smtp_encryption,
            smtp_from_email,
            site_url,
        })
    }
}

/// Parse a short duration such as `90d`, `12h`, `30m`, `45s` or a bare
/// number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration '{value}'"))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => bail!("unknown duration unit '{other}'"),
    };

    Ok(Duration::from_secs(amount * multiplier))
}
