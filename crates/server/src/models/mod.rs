//! Database models.

pub mod geo;
pub mod review;
pub mod role;
pub mod tour;
pub mod user;

pub use review::{CreateReview, Review, ReviewDocument, UpdateReview};
pub use role::Role;
pub use tour::{Tour, TourInput};
pub use user::{CreateUser, UpdateUser, User, UserSummary};
