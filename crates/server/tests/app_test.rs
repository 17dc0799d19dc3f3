#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Cross-cutting behaviour: health, fallback, headers and body limits.

mod common;

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode, header};
use natours::models::Role;
use natours::{AppState, build_router};
use serde_json::json;
use tower::ServiceExt;

use common::{body_json, json_request, run_test, shared_app};

#[test]
fn health_reports_postgres() {
    run_test(async {
        let app = shared_app().await;
        let (status, body) = app.get("/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "healthy", "postgres": true }));
    });
}

#[test]
fn unknown_routes_are_json_404s() {
    run_test(async {
        let app = shared_app().await;

        let (status, body) = app.get("/api/v1/nothing-here?x=1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], "Can't find /api/v1/nothing-here?x=1!");

        let (status, _) = app
            .send(Method::POST, "/definitely/not/here", None, Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    });
}

#[test]
fn security_headers_on_every_response() {
    run_test(async {
        let app = shared_app().await;
        for uri in ["/health", "/missing"] {
            let response = app
                .request(Request::get(uri).body(Body::empty()).unwrap())
                .await;
            let headers = response.headers();
            assert_eq!(headers["x-content-type-options"], "nosniff", "{uri}");
            assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
            assert_eq!(headers["referrer-policy"], "no-referrer");
            assert!(headers.contains_key("content-security-policy"));
        }
    });
}

#[test]
fn api_responses_carry_rate_limit_headers() {
    run_test(async {
        let app = shared_app().await;
        let response = app
            .request(Request::get("/api/v1/tours/tour-stats").body(Body::empty()).unwrap())
            .await;
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        assert!(response.headers().contains_key("x-ratelimit-remaining"));

        let response = app
            .request(Request::get("/health").body(Body::empty()).unwrap())
            .await;
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    });
}

#[test]
fn rotating_forwarded_for_still_hits_the_limit() {
    run_test(async {
        let app = shared_app().await;
        let mut config = app.state.config().clone();
        config.rate_limit_max = 2;
        config.trust_proxy = false;
        let router = build_router(AppState::with_pool(&config, app.db.clone()).unwrap());
        let peer = SocketAddr::from(([192, 0, 2, 1], 40_000));

        let mut statuses = Vec::new();
        for i in 0..6 {
            let request = Request::get("/api/v1/tours/tour-stats")
                .header("x-forwarded-for", format!("203.0.113.{i}"))
                .extension(ConnectInfo(peer))
                .body(Body::empty())
                .unwrap();
            statuses.push(router.clone().oneshot(request).await.unwrap().status());
        }

        assert!(statuses[..2].iter().all(|s| *s != StatusCode::TOO_MANY_REQUESTS));
        assert!(
            statuses[2..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS),
            "{statuses:?}"
        );
    });
}

#[test]
fn oversized_json_is_rejected() {
    run_test(async {
        let app = shared_app().await;
        let account = app.account(Role::Admin).await;
        let body = json!({ "name": "x".repeat(20 * 1024) });

        let response = app
            .request(json_request(
                Method::POST,
                "/api/v1/tours",
                Some(&account.token),
                Some(body),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "fail");
    });
}

#[test]
fn malformed_json_is_a_bad_request() {
    run_test(async {
        let app = shared_app().await;
        let request = Request::post("/api/v1/users/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.request(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "fail");
    });
}

#[test]
fn development_errors_include_detail() {
    run_test(async {
        let app = shared_app().await;
        if !app.state.config().environment.is_development() {
            return;
        }
        let (_, body) = app.get("/api/v1/tours/not-an-id", None).await;
        assert!(body.get("error").is_some(), "{body}");
    });
}
