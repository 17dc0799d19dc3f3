//! HTTP middleware and request extractors.

pub mod auth;
pub mod error_render;
pub mod rate_limit;
pub mod request_time;
pub mod sanitize;
pub mod security_headers;

pub use auth::CurrentUser;
pub use rate_limit::RateLimiter;
pub use request_time::RequestTime;
pub use sanitize::SanitizedJson;
