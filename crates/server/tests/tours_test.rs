#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Tour route integration tests.

mod common;

use axum::http::StatusCode;
use natours::models::Role;
use natours_test_utils::{assert, test_tour};
use serde_json::{Value, json};

use common::{run_test, shared_app};

fn names(body: &Value) -> Vec<String> {
    body["data"]["tours"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str().map(str::to_string))
        .collect()
}

// -------------------------------------------------------------------------
// Reads
// -------------------------------------------------------------------------

#[test]
fn list_is_public_and_stamped() {
    run_test(async {
        let app = shared_app().await;
        let (status, body) = app.get("/api/v1/tours", None).await;

        assert_eq!(status, StatusCode::OK);
        assert::success(&body);
        assert::has_key(&body, "requestedAt");
        assert_eq!(
            body["results"].as_u64().unwrap() as usize,
            body["data"]["tours"].as_array().unwrap().len()
        );
    });
}

#[test]
fn list_filters_sorts_and_projects() {
    run_test(async {
        let app = shared_app().await;
        let cheap = test_tour("Filter Cheap").with_price(11.0).with_duration(3);
        let pricey = test_tour("Filter Pricey").with_price(12.0).with_duration(3);
        let cheap_id = app.create_tour(cheap.to_json()).await;
        let pricey_id = app.create_tour(pricey.to_json()).await;

        let (status, body) = app
            .get(
                "/api/v1/tours?price[gte]=11&price[lte]=12&sort=-price&fields=name,price",
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let found = names(&body);
        let cheap_pos = found.iter().position(|n| *n == cheap.name).unwrap();
        let pricey_pos = found.iter().position(|n| *n == pricey.name).unwrap();
        assert!(pricey_pos < cheap_pos, "sorted by price descending");

        let first = &body["data"]["tours"][0];
        assert::has_key(first, "id");
        assert::has_key(first, "price");
        assert::lacks_key(first, "summary");

        app.cleanup_tour(cheap_id).await;
        app.cleanup_tour(pricey_id).await;
    });
}

#[test]
fn repeated_whitelisted_filter_means_any_of() {
    run_test(async {
        let app = shared_app().await;
        let a = test_tour("Pollution A").with_price(21.0);
        let b = test_tour("Pollution B").with_price(22.0);
        let a_id = app.create_tour(a.to_json()).await;
        let b_id = app.create_tour(b.to_json()).await;

        let (status, body) = app.get("/api/v1/tours?price=21&price=22", None).await;
        assert_eq!(status, StatusCode::OK);
        let found = names(&body);
        assert!(found.contains(&a.name));
        assert!(found.contains(&b.name));

        app.cleanup_tour(a_id).await;
        app.cleanup_tour(b_id).await;
    });
}

#[test]
fn unknown_query_fields_are_rejected() {
    run_test(async {
        let app = shared_app().await;
        for uri in [
            "/api/v1/tours?bogus=1",
            "/api/v1/tours?sort=bogus",
            "/api/v1/tours?fields=name,bogus",
            "/api/v1/tours?page=0",
        ] {
            let (status, body) = app.get(uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}: {body}");
            assert_eq!(body["status"], "fail");
        }
    });
}

#[test]
fn top_five_cheap_applies_preset() {
    run_test(async {
        let app = shared_app().await;
        let (status, body) = app.get("/api/v1/tours/top-5-cheap?limit=50", None).await;

        assert_eq!(status, StatusCode::OK);
        let tours = body["data"]["tours"].as_array().unwrap();
        assert!(tours.len() <= 5);
        for tour in tours {
            assert::lacks_key(tour, "description");
            assert::lacks_key(tour, "guides");
        }
    });
}

#[test]
fn get_tour_populates_guides_and_reviews() {
    run_test(async {
        let app = shared_app().await;
        let guide = app.account(Role::Guide).await;
        let id = app
            .create_tour(test_tour("Guided").with_guide(guide.user.id).to_json())
            .await;

        let (status, body) = app.get(&format!("/api/v1/tours/{id}"), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let tour = &body["data"]["tour"];
        assert_eq!(tour["guides"][0]["name"], guide.user.name.as_str());
        assert_eq!(tour["guides"][0]["role"], "guide");
        assert::lacks_key(&tour["guides"][0], "passwordHash");
        assert_eq!(tour["reviews"], json!([]));
        assert_eq!(tour["durationWeeks"].as_f64().unwrap(), 5.0 / 7.0);
        assert::lacks_key(tour, "createdAt");

        app.cleanup_tour(id).await;
    });
}

#[test]
fn missing_and_malformed_ids() {
    run_test(async {
        let app = shared_app().await;

        let (status, body) = app
            .get(&format!("/api/v1/tours/{}", uuid::Uuid::now_v7()), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert::fails_with(&body, "No document found with that id!");

        let (status, body) = app.get("/api/v1/tours/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert::fails_with(&body, "Invalid id: not-an-id");
    });
}

#[test]
fn secret_tours_are_hidden_from_lists_only() {
    run_test(async {
        let app = shared_app().await;
        let secret = test_tour("Hidden").secret();
        let id = app.create_tour(secret.to_json()).await;

        let (_, body) = app.get("/api/v1/tours?limit=100&fields=name", None).await;
        assert!(!names(&body).contains(&secret.name));

        let (status, body) = app.get(&format!("/api/v1/tours/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tour"]["secretTour"], true);

        app.cleanup_tour(id).await;
    });
}

#[test]
fn secret_tours_stay_editable() {
    run_test(async {
        let app = shared_app().await;
        let admin = app.account(Role::Admin).await;
        let tour = test_tour("Toggled");
        let id = app.create_tour(tour.to_json()).await;
        let uri = format!("/api/v1/tours/{id}");

        let (status, _) = app
            .patch(&uri, Some(&admin.token), json!({ "secretTour": true }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = app.get("/api/v1/tours?limit=100&fields=name", None).await;
        assert!(!names(&body).contains(&tour.name));

        let (status, body) = app
            .patch(&uri, Some(&admin.token), json!({ "secretTour": false }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["tour"]["secretTour"], false);
        let (_, body) = app.get("/api/v1/tours?limit=100&fields=name", None).await;
        assert!(names(&body).contains(&tour.name));

        app.patch(&uri, Some(&admin.token), json!({ "secretTour": true }))
            .await;
        assert_eq!(app.delete(&uri, Some(&admin.token)).await, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    });
}

// -------------------------------------------------------------------------
// Writes
// -------------------------------------------------------------------------

#[test]
fn writes_require_editor_roles() {
    run_test(async {
        let app = shared_app().await;
        let body = test_tour("Forbidden").to_json();

        let (status, json) = app.post("/api/v1/tours", None, body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert::fails_with(&json, "Please login to access this content!");

        for role in [Role::User, Role::Guide] {
            let account = app.account(role).await;
            let (status, json) = app
                .post("/api/v1/tours", Some(&account.token), body.clone())
                .await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert::fails_with(&json, "You do not have permission to perform this action!");
        }

        let lead = app.account(Role::LeadGuide).await;
        let (status, json) = app.post("/api/v1/tours", Some(&lead.token), body).await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        let id = json["data"]["tour"]["id"].as_str().unwrap().parse().unwrap();
        app.cleanup_tour(id).await;
    });
}

#[test]
fn create_validates_input() {
    run_test(async {
        let app = shared_app().await;
        let admin = app.account(Role::Admin).await;

        let (status, body) = app
            .post("/api/v1/tours", Some(&admin.token), json!({ "name": "Short" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["message"].as_str().unwrap();
        assert!(message.starts_with("Invalid input data."));
        assert!(message.contains("A tour must have a price!"));

        let bad_discount = test_tour("Discounted").with_price(100.0).with_discount(150.0);
        let (status, body) = app
            .post("/api/v1/tours", Some(&admin.token), bad_discount.to_json())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("Discount price (150) should be below regular price!")
        );
    });
}

#[test]
fn duplicate_tour_name_is_rejected() {
    run_test(async {
        let app = shared_app().await;
        let tour = test_tour("Twin");
        let id = app.create_tour(tour.to_json()).await;
        let admin = app.account(Role::Admin).await;

        let (status, body) = app
            .post("/api/v1/tours", Some(&admin.token), tour.to_json())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Duplicate field value"));

        app.cleanup_tour(id).await;
    });
}

#[test]
fn update_merges_and_recomputes_slug() {
    run_test(async {
        let app = shared_app().await;
        let id = app.create_tour(test_tour("Patched").to_json()).await;
        let admin = app.account(Role::Admin).await;
        let new_name = format!("Renamed {}", natours_test_utils::unique_suffix());

        let (status, body) = app
            .patch(
                &format!("/api/v1/tours/{id}"),
                Some(&admin.token),
                json!({ "name": new_name, "price": 500 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let tour = &body["data"]["tour"];
        assert_eq!(tour["name"], new_name.as_str());
        assert_eq!(tour["slug"], new_name.to_lowercase().replace(' ', "-").as_str());
        assert_eq!(tour["price"], 500.0);
        assert_eq!(tour["duration"], 5);

        app.cleanup_tour(id).await;
    });
}

#[test]
fn delete_removes_tour() {
    run_test(async {
        let app = shared_app().await;
        let id = app.create_tour(test_tour("Doomed").to_json()).await;
        let admin = app.account(Role::Admin).await;

        let uri = format!("/api/v1/tours/{id}");
        assert_eq!(app.delete(&uri, Some(&admin.token)).await, StatusCode::NO_CONTENT);
        assert_eq!(app.delete(&uri, Some(&admin.token)).await, StatusCode::NOT_FOUND);
    });
}

// -------------------------------------------------------------------------
// Geo and reports
// -------------------------------------------------------------------------

#[test]
fn geo_queries() {
    run_test(async {
        let app = shared_app().await;
        // Los Angeles, and Las Vegas roughly 230 mi away.
        let near = test_tour("Geo Near").starting_at(34.05, -118.24);
        let far = test_tour("Geo Far").starting_at(36.17, -115.14);
        let near_id = app.create_tour(near.to_json()).await;
        let far_id = app.create_tour(far.to_json()).await;

        let (status, body) = app
            .get("/api/v1/tours/tours-within/50/center/34.1,-118.2/unit/mi", None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let within: Vec<&str> = body["data"]["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(within.contains(&near.name.as_str()));
        assert!(!within.contains(&far.name.as_str()));

        let (status, body) = app
            .get("/api/v1/tours/distances/34.05,-118.24/unit/km", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"]["data"].as_array().unwrap();
        let distance_of = |name: &str| {
            rows.iter()
                .find(|r| r["name"] == name)
                .and_then(|r| r["distance"].as_f64())
                .unwrap()
        };
        assert!(distance_of(&near.name) < 1.0);
        let far_km = distance_of(&far.name);
        assert!((far_km - 370.0).abs() < 30.0, "got {far_km}");

        let (status, body) = app
            .get("/api/v1/tours/distances/nonsense/unit/km", None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert::fails_with(&body, "Please provide latitude and longitude in the format lat,lng.");

        app.cleanup_tour(near_id).await;
        app.cleanup_tour(far_id).await;
    });
}

#[test]
fn stats_are_public() {
    run_test(async {
        let app = shared_app().await;
        let (status, body) = app.get("/api/v1/tours/tour-stats", None).await;

        assert_eq!(status, StatusCode::OK);
        let stats = body["data"]["stats"].as_array().unwrap();
        let prices: Vec<f64> = stats.iter().filter_map(|s| s["avgPrice"].as_f64()).collect();
        assert!(prices.windows(2).all(|w| w[0] <= w[1]));
    });
}

#[test]
fn monthly_plan_is_role_gated() {
    run_test(async {
        let app = shared_app().await;
        let tour = test_tour("Planned").with_start_dates(&[
            "2031-03-01T09:00:00Z",
            "2031-03-15T09:00:00Z",
            "2031-07-01T09:00:00Z",
        ]);
        let id = app.create_tour(tour.to_json()).await;

        let user = app.account(Role::User).await;
        let (status, _) = app
            .get("/api/v1/tours/monthly-plan/2031", Some(&user.token))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let guide = app.account(Role::Guide).await;
        let (status, body) = app
            .get("/api/v1/tours/monthly-plan/2031", Some(&guide.token))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let plan = body["data"]["plan"].as_array().unwrap();
        let march = plan.iter().find(|m| m["month"] == 3).unwrap();
        assert!(march["numTourStarts"].as_i64().unwrap() >= 2);
        assert!(
            march["tours"]
                .as_array()
                .unwrap()
                .iter()
                .any(|n| n == tour.name.as_str())
        );

        app.cleanup_tour(id).await;
    });
}
