pub mod permissions;
pub mod rating;

pub use permissions::{Access, Resource};
pub use rating::RatingService;
