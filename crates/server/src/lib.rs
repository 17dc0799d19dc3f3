//! Natours API library.
//!
//! Exposes the router and its building blocks for integration testing.
//! The `natours` binary runs the server and the data import commands.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod middleware;
pub mod models;
pub mod query;
pub mod routes;
pub mod services;
pub mod state;

pub use app::build_router;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
