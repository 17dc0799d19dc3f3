#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Shared harness for integration tests.
//!
//! Tests drive the real router built by [`natours::build_router`] against a
//! real PostgreSQL database (`DATABASE_URL`). One [`TestApp`] is shared by
//! every test in a binary and lives on a long-lived runtime so pooled
//! connections stay valid after an individual test finishes.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use natours::models::{CreateUser, Role, User};
use natours::{AppState, Config, build_router};
use natours_test_utils::test_user;

/// Runtime that outlives all individual tests.
pub static SHARED_RT: std::sync::LazyLock<tokio::runtime::Runtime> =
    std::sync::LazyLock::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("Failed to build shared test runtime")
    });

static SHARED_APP: std::sync::OnceLock<TestApp> = std::sync::OnceLock::new();

/// Get the shared [`TestApp`], initializing it on [`SHARED_RT`] on first use.
pub async fn shared_app() -> &'static TestApp {
    SHARED_APP.get_or_init(|| {
        let handle = SHARED_RT.handle().clone();
        std::thread::spawn(move || handle.block_on(TestApp::new()))
            .join()
            .expect("TestApp init thread panicked")
    })
}

/// Run an async test body on [`SHARED_RT`].
pub fn run_test<F: std::future::Future<Output = ()> + Send>(f: F) {
    SHARED_RT.block_on(f);
}

/// A signed-in test account.
#[derive(Debug, Clone)]
pub struct TestAccount {
    pub user: User,
    pub token: String,
    pub password: String,
}

/// Test application wrapper around the real router and state.
pub struct TestApp {
    router: Router,
    pub db: PgPool,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        dotenvy::dotenv().ok();

        // SAFETY: set before any other thread reads the environment.
        unsafe {
            if std::env::var("JWT_SECRET").is_err() {
                std::env::set_var("JWT_SECRET", "integration-test-secret-that-is-long-enough");
            }
            // Every request in a test binary shares one client address.
            std::env::set_var("RATE_LIMIT_MAX", "1000000");
            if std::env::var("PUBLIC_DIR").is_err() {
                let dir = std::env::temp_dir().join(format!("natours-test-{}", Uuid::now_v7()));
                std::env::set_var("PUBLIC_DIR", dir);
            }
            if std::env::var("DATABASE_MAX_CONNECTIONS").is_err() {
                std::env::set_var("DATABASE_MAX_CONNECTIONS", "20");
            }
        }

        let config = Config::from_env().expect("Failed to load config");
        let state = AppState::new(&config)
            .await
            .expect("Failed to initialize AppState");
        let db = state.db().clone();
        let router = build_router(state.clone());

        // Open all pool connections on the shared runtime.
        {
            let mut conns = Vec::new();
            for _ in 0..config.database_max_connections {
                if let Ok(c) = db.acquire().await {
                    conns.push(c);
                }
            }
            drop(conns);
        }

        Self { router, db, state }
    }

    /// Send a request to the application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Send a JSON request, optionally authenticated, and decode the reply.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(json_request(method, uri, token, body)).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> StatusCode {
        self.request(json_request(Method::DELETE, uri, token, None))
            .await
            .status()
    }

    /// Create an account with `role` directly in the database and sign a
    /// token for it.
    pub async fn account(&self, role: Role) -> TestAccount {
        let fixture = test_user(&format!("Test {role}"));
        let mut input = CreateUser {
            name: fixture.name.clone(),
            email: fixture.email.clone(),
            password: fixture.password.clone(),
            password_confirm: fixture.password.clone(),
            role: Some(role),
            photo: None,
        };
        input.validate().expect("fixture user is valid");

        let user = User::create(&self.db, &input)
            .await
            .expect("Failed to create test user");
        let token = self.state.tokens().sign(user.id).expect("Failed to sign token");

        TestAccount {
            user,
            token,
            password: fixture.password,
        }
    }

    /// Create a tour as a fresh admin and return its id.
    pub async fn create_tour(&self, body: Value) -> Uuid {
        let admin = self.account(Role::Admin).await;
        let (status, json) = self.post("/api/v1/tours", Some(&admin.token), body).await;
        assert_eq!(status, StatusCode::CREATED, "tour creation failed: {json}");
        json["data"]["tour"]["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("created tour has an id")
    }

    /// Remove a tour (and its reviews) regardless of secrecy.
    pub async fn cleanup_tour(&self, id: Uuid) {
        sqlx::query("DELETE FROM tours WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .ok();
    }

    /// Current rating summary of a tour, read straight from the table.
    pub async fn tour_ratings(&self, id: Uuid) -> (f64, i32) {
        sqlx::query_as("SELECT ratings_average, ratings_quantity FROM tours WHERE id = $1")
            .bind(id)
            .fetch_one(&self.db)
            .await
            .expect("tour exists")
    }
}

/// Build a request with a JSON body and an optional bearer token.
pub fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Decode a response body as JSON. Empty bodies decode to `Null`.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        panic!("response is not JSON: {}", String::from_utf8_lossy(&bytes))
    })
}

/// The `name=value` part of each `Set-Cookie` header.
pub fn extract_cookies(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

/// One part of a multipart body.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        field: &'a str,
        filename: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

const BOUNDARY: &str = "natours-test-boundary";

/// Build a `multipart/form-data` request with an optional bearer token.
pub fn multipart_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    parts: &[Part<'_>],
) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
            Part::File {
                field,
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder().method(method).uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

/// A PNG of noisy pixels. Noise keeps the encoded size close to
/// `width * height * 3` bytes.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut seed: u32 = 0x2545_f491;
    let img = image::RgbImage::from_fn(width, height, |_, _| {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [r, g, b, _] = seed.to_le_bytes();
        image::Rgb([r, g, b])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
