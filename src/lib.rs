//! Movie watch-list API: stream platforms, watch-list items and user
//! reviews, with review-driven rating aggregates.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
