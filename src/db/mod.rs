//! Persistence contract and its backends.
//!
//! Handlers and services only see [`Database`] and [`UnitOfWork`]; the
//! PostgreSQL and in-memory backends both honor the same locking and
//! all-or-nothing commit rules.

use async_trait::async_trait;

use crate::{
    error::AppResult,
    models::{
        NewReview, Page, PageRequest, PlatformInput, Review, ReviewFilter, ReviewInput,
        StreamPlatform, User, UserReviewQuery, WatchListFilter, WatchListInput, WatchListItem,
    },
};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use self::memory::MemoryDatabase;
pub use self::postgres::{create_pool, PgDatabase};
pub use self::redis::create_redis_client;
pub use self::redis::Cache;
pub use self::redis::CacheKey;
pub use self::redis::CacheWriterHandle;

/// Storage operations used by the HTTP layer and the rating service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// Opens a unit of work; dropping it without `commit` rolls back
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>>;

    /// Resolves an API token to its user
    async fn user_by_token(&self, token: &str) -> AppResult<Option<User>>;

    async fn list_platforms(&self) -> AppResult<Vec<StreamPlatform>>;
    async fn get_platform(&self, id: i64) -> AppResult<StreamPlatform>;
    async fn create_platform(&self, input: &PlatformInput) -> AppResult<StreamPlatform>;
    async fn update_platform(&self, id: i64, input: &PlatformInput) -> AppResult<StreamPlatform>;
    /// Deletes a platform together with its watch-list items
    async fn delete_platform(&self, id: i64) -> AppResult<()>;

    async fn list_watchlist(&self, filter: &WatchListFilter) -> AppResult<Vec<WatchListItem>>;
    async fn get_watchlist_item(&self, id: i64) -> AppResult<WatchListItem>;
    async fn create_watchlist_item(&self, input: &WatchListInput) -> AppResult<WatchListItem>;
    async fn update_watchlist_item(
        &self,
        id: i64,
        input: &WatchListInput,
    ) -> AppResult<WatchListItem>;
    /// Deletes an item together with its reviews
    async fn delete_watchlist_item(&self, id: i64) -> AppResult<()>;

    async fn list_reviews_for_item(
        &self,
        watchlist_id: i64,
        filter: &ReviewFilter,
        page: PageRequest,
    ) -> AppResult<Page<Review>>;
    async fn list_reviews_by_user(
        &self,
        query: &UserReviewQuery,
        page: PageRequest,
    ) -> AppResult<Page<Review>>;
    async fn get_review(&self, id: i64) -> AppResult<Review>;
    async fn update_review(&self, id: i64, input: &ReviewInput) -> AppResult<Review>;
    async fn delete_review(&self, id: i64) -> AppResult<()>;
}

/// Transaction scoped to a single watch-list item.
///
/// `lock_watchlist_item` must be called first; it holds the item exclusively
/// until the unit of work is committed or dropped.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_watchlist_item(&mut self, id: i64) -> AppResult<WatchListItem>;
    async fn review_exists(&mut self, watchlist_id: i64, user_id: i64) -> AppResult<bool>;
    async fn save_watchlist_item(&mut self, item: &WatchListItem) -> AppResult<()>;
    async fn insert_review(&mut self, review: NewReview) -> AppResult<Review>;
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

pub(crate) fn watchlist_not_found(id: i64) -> crate::error::AppError {
    crate::error::AppError::NotFound(format!("Watch-list item {} not found", id))
}

pub(crate) fn review_not_found(id: i64) -> crate::error::AppError {
    crate::error::AppError::NotFound(format!("Review {} not found", id))
}

pub(crate) fn platform_not_found(id: i64) -> crate::error::AppError {
    crate::error::AppError::NotFound(format!("Stream platform {} not found", id))
}
