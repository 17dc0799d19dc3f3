//! Natours test utilities.
//!
//! Fixture builders that produce request bodies for the API, plus JSON
//! assertion helpers for integration tests.

use serde_json::{Value, json};
use uuid::Uuid;

/// A short unique suffix so fixtures never collide on unique columns.
pub fn unique_suffix() -> String {
    let id = Uuid::now_v7().simple().to_string();
    id[id.len() - 8..].to_string()
}

/// Create a tour fixture with valid defaults.
pub fn test_tour(name_prefix: &str) -> TestTour {
    // Names must be 10 to 40 characters.
    let prefix: String = name_prefix.chars().take(26).collect();
    TestTour {
        name: format!("{prefix} Tour {}", unique_suffix()),
        duration: 5,
        max_group_size: 25,
        difficulty: "easy".to_string(),
        price: 397.0,
        price_discount: None,
        summary: "Breathtaking hike through the Canadian Banff National Park".to_string(),
        image_cover: "tour-1-cover.jpg".to_string(),
        start_dates: vec!["2021-04-25T09:00:00Z".to_string()],
        secret_tour: false,
        start_location: None,
        guides: Vec::new(),
    }
}

/// A tour request body builder.
#[derive(Debug, Clone)]
pub struct TestTour {
    pub name: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub image_cover: String,
    pub start_dates: Vec<String>,
    pub secret_tour: bool,
    pub start_location: Option<(f64, f64)>,
    pub guides: Vec<Uuid>,
}

impl TestTour {
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_discount(mut self, discount: f64) -> Self {
        self.price_discount = Some(discount);
        self
    }

    pub fn with_duration(mut self, days: i32) -> Self {
        self.duration = days;
        self
    }

    pub fn with_difficulty(mut self, difficulty: &str) -> Self {
        self.difficulty = difficulty.to_string();
        self
    }

    pub fn with_start_dates(mut self, dates: &[&str]) -> Self {
        self.start_dates = dates.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Start location as `(lat, lng)`.
    pub fn starting_at(mut self, lat: f64, lng: f64) -> Self {
        self.start_location = Some((lat, lng));
        self
    }

    pub fn with_guide(mut self, guide: Uuid) -> Self {
        self.guides.push(guide);
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret_tour = true;
        self
    }

    /// JSON body for `POST /api/v1/tours`.
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "name": self.name,
            "duration": self.duration,
            "maxGroupSize": self.max_group_size,
            "difficulty": self.difficulty,
            "price": self.price,
            "summary": self.summary,
            "imageCover": self.image_cover,
            "startDates": self.start_dates,
            "secretTour": self.secret_tour,
            "guides": self.guides,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(discount) = self.price_discount {
                obj.insert("priceDiscount".to_string(), json!(discount));
            }
            if let Some((lat, lng)) = self.start_location {
                obj.insert(
                    "startLocation".to_string(),
                    json!({
                        "type": "Point",
                        "coordinates": [lng, lat],
                        "address": "Test address",
                        "description": "Test start",
                    }),
                );
            }
        }
        body
    }
}

/// Create a signup fixture with a unique email.
pub fn test_user(name: &str) -> TestUser {
    TestUser {
        name: name.to_string(),
        email: format!("{}-{}@example.com", name.to_lowercase().replace(' ', "."), unique_suffix()),
        password: "test1234".to_string(),
        role: None,
    }
}

/// A user request body builder.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

impl TestUser {
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Role, honoured only by the admin create-user route.
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    /// JSON body for signup or admin user creation.
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "name": self.name,
            "email": self.email,
            "password": self.password,
            "passwordConfirm": self.password,
        });
        if let (Some(role), Some(obj)) = (&self.role, body.as_object_mut()) {
            obj.insert("role".to_string(), json!(role));
        }
        body
    }

    /// JSON body for login.
    pub fn login_json(&self) -> Value {
        json!({ "email": self.email, "password": self.password })
    }
}

/// JSON body for a review.
pub fn test_review(text: &str, rating: i16) -> Value {
    json!({ "review": text, "rating": rating })
}

/// Assertion helpers for API responses.
pub mod assert {
    use serde_json::Value;

    /// Assert a `{status:"success"}` body.
    pub fn success(body: &Value) {
        assert_eq!(
            body["status"], "success",
            "Expected a success body, got: {body}"
        );
    }

    /// Assert a failure body with the given message.
    pub fn fails_with(body: &Value, message: &str) {
        assert_eq!(body["status"], "fail", "Expected a fail body, got: {body}");
        assert_eq!(
            body["message"], message,
            "Unexpected message in: {body}"
        );
    }

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a JSON value lacks a key.
    pub fn lacks_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_none(),
            "Expected JSON to NOT have key '{key}', got: {value}"
        );
    }
}
