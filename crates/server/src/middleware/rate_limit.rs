//! Per-client fixed-window rate limiting for the API.
//!
//! Counters live in a `DashMap` keyed by client address; each window starts
//! at a client's first request and resets once it elapses.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Message returned once a client exhausts its window.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again in one hour!";

/// Stale windows are swept once the map grows past this many clients.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_after: u64,
}

/// In-memory fixed-window counter.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: DashMap::new(),
        }
    }

    /// Count a request from `client`.
    pub fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> RateLimitDecision {
        if self.windows.len() > SWEEP_THRESHOLD {
            self.windows
                .retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        entry.count = entry.count.saturating_add(1);
        let elapsed = now.duration_since(entry.started);
        let reset_after = self.window.saturating_sub(elapsed).as_secs().max(1);

        RateLimitDecision {
            allowed: entry.count <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(entry.count),
            reset_after,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max", &self.max)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Get the client identifier (IP address) for rate limiting.
///
/// Forwarding headers are only read when `trust_proxy` is set; otherwise
/// the peer address is the key.
pub fn get_client_id(addr: Option<SocketAddr>, headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        // X-Forwarded-For first, first hop only
        if let Some(forwarded) = headers.get("x-forwarded-for")
            && let Ok(value) = forwarded.to_str()
            && let Some(ip) = value.split(',').next()
            && !ip.trim().is_empty()
        {
            return ip.trim().to_string();
        }

        if let Some(real_ip) = headers.get("x-real-ip")
            && let Ok(value) = real_ip.to_str()
            && !value.trim().is_empty()
        {
            return value.trim().to_string();
        }
    }

    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    set_header(headers, "x-ratelimit-limit", u64::from(decision.limit));
    set_header(headers, "x-ratelimit-remaining", u64::from(decision.remaining));
    set_header(headers, "x-ratelimit-reset", decision.reset_after);
}

/// Rate limit exceeded response.
pub fn rate_limit_response(decision: &RateLimitDecision) -> Response {
    let mut response = AppError::TooManyRequests(RATE_LIMIT_MESSAGE.to_string()).into_response();
    apply_headers(response.headers_mut(), decision);
    set_header(response.headers_mut(), "retry-after", decision.reset_after);
    response
}

/// Middleware applied to `/api` routes.
pub async fn limit_api(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let client = get_client_id(addr, request.headers(), state.config().trust_proxy);

    let decision = state.rate_limiter().check(&client);
    if !decision.allowed {
        debug!(client = %client, limit = decision.limit, "rate limit exceeded");
        return rate_limit_response(&decision);
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(3600));
        let now = Instant::now();
        for expected_remaining in [2, 1, 0] {
            let d = limiter.check_at("1.2.3.4", now);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }
        let d = limiter.check_at("1.2.3.4", now);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("a", start).allowed);
        assert!(!limiter.check_at("a", start + Duration::from_secs(30)).allowed);
        let later = limiter.check_at("a", start + Duration::from_secs(61));
        assert!(later.allowed);
        assert_eq!(later.reset_after, 60);
    }

    #[test]
    fn client_id_uses_peer_address_by_default() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());

        assert_eq!(get_client_id(Some(addr), &headers, false), "127.0.0.1");
        assert_eq!(get_client_id(Some(addr), &HeaderMap::new(), false), "127.0.0.1");
        assert_eq!(get_client_id(None, &headers, false), "unknown");
    }

    #[test]
    fn client_id_reads_forwarding_headers_behind_proxy() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(get_client_id(Some(addr), &headers, true), "10.0.0.1");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(get_client_id(None, &headers, true), "10.0.0.9");

        assert_eq!(get_client_id(Some(addr), &HeaderMap::new(), true), "127.0.0.1");
    }

    #[test]
    fn rotating_forwarded_for_shares_one_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(3600));
        let addr: SocketAddr = "192.0.2.7:41000".parse().unwrap();
        let now = Instant::now();

        let allowed: Vec<bool> = (0..6)
            .map(|i| {
                let mut headers = HeaderMap::new();
                headers.insert("x-forwarded-for", format!("10.1.1.{i}").parse().unwrap());
                let client = get_client_id(Some(addr), &headers, false);
                limiter.check_at(&client, now).allowed
            })
            .collect();
        assert_eq!(allowed, [true, true, false, false, false, false]);
        assert_eq!(limiter.windows.len(), 1);
    }

    #[test]
    fn limited_response_carries_headers() {
        let response = rate_limit_response(&RateLimitDecision {
            allowed: false,
            limit: 200,
            remaining: 0,
            reset_after: 42,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-ratelimit-limit"], "200");
    }
}
