//! In-process storage used by tests and `STORAGE_BACKEND=memory`.
//!
//! Rows live behind one `RwLock`. Rating updates additionally take a
//! per-item mutex for the whole unit of work, so two submissions for the
//! same item serialize while different items proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{platform_not_found, review_not_found, watchlist_not_found, Database, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::{
        NewReview, Page, PageRequest, PlatformInput, Review, ReviewFilter, ReviewInput,
        StreamPlatform, User, UserReviewQuery, WatchListFilter, WatchListInput, WatchListItem,
    },
};

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    tokens: HashMap<String, i64>,
    platforms: BTreeMap<i64, StreamPlatform>,
    watchlist: BTreeMap<i64, WatchListItem>,
    reviews: BTreeMap<i64, Review>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn review_exists(&self, watchlist_id: i64, user_id: i64) -> bool {
        self.reviews
            .values()
            .any(|r| r.watchlist_id == watchlist_id && r.review_user_id == user_id)
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    item_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Inner {
    async fn lock_item(&self, id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.item_locks.lock().await;
            // Entries nobody holds or waits on are dropped, including deleted ids
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Storage kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user and returns it with a freshly issued API token
    pub async fn create_user(&self, username: &str, email: &str, is_staff: bool) -> (User, String) {
        let token = Uuid::new_v4().simple().to_string();
        let user = self.create_user_with_token(username, email, is_staff, &token).await;
        (user, token)
    }

    /// Registers a user authenticated by a caller-chosen token
    pub async fn create_user_with_token(
        &self,
        username: &str,
        email: &str,
        is_staff: bool,
        token: &str,
    ) -> User {
        let mut tables = self.inner.tables.write().await;
        let user = User {
            id: tables.next_id(),
            username: username.to_string(),
            email: email.to_string(),
            is_staff,
        };
        tables.users.insert(user.id, user.clone());
        tables.tokens.insert(token.to_string(), user.id);
        user
    }

    fn paginate(page: PageRequest, matching: Vec<Review>) -> Page<Review> {
        let results = page.slice(&matching);
        Page::new(page, matching.len() as u64, results)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            inner: self.inner.clone(),
            guard: None,
            item: None,
            review: None,
        }))
    }

    async fn user_by_token(&self, token: &str) -> AppResult<Option<User>> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .tokens
            .get(token)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn list_platforms(&self) -> AppResult<Vec<StreamPlatform>> {
        let tables = self.inner.tables.read().await;
        Ok(tables.platforms.values().cloned().collect())
    }

    async fn get_platform(&self, id: i64) -> AppResult<StreamPlatform> {
        let tables = self.inner.tables.read().await;
        tables
            .platforms
            .get(&id)
            .cloned()
            .ok_or_else(|| platform_not_found(id))
    }

    async fn create_platform(&self, input: &PlatformInput) -> AppResult<StreamPlatform> {
        let mut tables = self.inner.tables.write().await;
        let platform = StreamPlatform {
            id: tables.next_id(),
            name: input.name.clone(),
            about: input.about.clone(),
            website: input.website.clone(),
        };
        tables.platforms.insert(platform.id, platform.clone());
        Ok(platform)
    }

    async fn update_platform(&self, id: i64, input: &PlatformInput) -> AppResult<StreamPlatform> {
        let mut tables = self.inner.tables.write().await;
        let platform = tables
            .platforms
            .get_mut(&id)
            .ok_or_else(|| platform_not_found(id))?;
        platform.name = input.name.clone();
        platform.about = input.about.clone();
        platform.website = input.website.clone();
        Ok(platform.clone())
    }

    async fn delete_platform(&self, id: i64) -> AppResult<()> {
        let mut tables = self.inner.tables.write().await;
        if tables.platforms.remove(&id).is_none() {
            return Err(platform_not_found(id));
        }

        let items: Vec<i64> = tables
            .watchlist
            .values()
            .filter(|item| item.platform_id == id)
            .map(|item| item.id)
            .collect();
        tables.watchlist.retain(|_, item| item.platform_id != id);
        tables.reviews.retain(|_, r| !items.contains(&r.watchlist_id));
        Ok(())
    }

    async fn list_watchlist(&self, filter: &WatchListFilter) -> AppResult<Vec<WatchListItem>> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .watchlist
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect())
    }

    async fn get_watchlist_item(&self, id: i64) -> AppResult<WatchListItem> {
        let tables = self.inner.tables.read().await;
        tables
            .watchlist
            .get(&id)
            .cloned()
            .ok_or_else(|| watchlist_not_found(id))
    }

    async fn create_watchlist_item(&self, input: &WatchListInput) -> AppResult<WatchListItem> {
        let mut tables = self.inner.tables.write().await;
        if !tables.platforms.contains_key(&input.platform_id) {
            return Err(AppError::field("platform", "Invalid pk - object does not exist."));
        }

        let item = WatchListItem {
            id: tables.next_id(),
            title: input.title.clone(),
            storyline: input.storyline.clone(),
            platform_id: input.platform_id,
            active: input.active,
            avg_rating: 0.0,
            number_rating: 0,
            created: Utc::now(),
        };
        tables.watchlist.insert(item.id, item.clone());
        Ok(item)
    }

    async fn update_watchlist_item(
        &self,
        id: i64,
        input: &WatchListInput,
    ) -> AppResult<WatchListItem> {
        let _guard = self.inner.lock_item(id).await;
        let mut tables = self.inner.tables.write().await;
        if !tables.platforms.contains_key(&input.platform_id) {
            return Err(AppError::field("platform", "Invalid pk - object does not exist."));
        }

        let item = tables
            .watchlist
            .get_mut(&id)
            .ok_or_else(|| watchlist_not_found(id))?;
        item.title = input.title.clone();
        item.storyline = input.storyline.clone();
        item.platform_id = input.platform_id;
        item.active = input.active;
        Ok(item.clone())
    }

    async fn delete_watchlist_item(&self, id: i64) -> AppResult<()> {
        let _guard = self.inner.lock_item(id).await;
        let mut tables = self.inner.tables.write().await;
        if tables.watchlist.remove(&id).is_none() {
            return Err(watchlist_not_found(id));
        }
        tables.reviews.retain(|_, r| r.watchlist_id != id);
        Ok(())
    }

    async fn list_reviews_for_item(
        &self,
        watchlist_id: i64,
        filter: &ReviewFilter,
        page: PageRequest,
    ) -> AppResult<Page<Review>> {
        let tables = self.inner.tables.read().await;
        let matching: Vec<Review> = tables
            .reviews
            .values()
            .filter(|r| r.watchlist_id == watchlist_id && filter.matches(r))
            .cloned()
            .collect();
        Ok(Self::paginate(page, matching))
    }

    async fn list_reviews_by_user(
        &self,
        query: &UserReviewQuery,
        page: PageRequest,
    ) -> AppResult<Page<Review>> {
        let tables = self.inner.tables.read().await;
        let search = query.search.as_ref().map(|s| s.to_lowercase());

        let matching: Vec<Review> = tables
            .reviews
            .values()
            .filter(|r| {
                let Some(user) = tables.users.get(&r.review_user_id) else {
                    return false;
                };
                let username_ok = query.username.as_ref().map_or(true, |u| &user.username == u);
                let search_ok = search.as_ref().map_or(true, |s| {
                    user.username.to_lowercase().contains(s) || user.email.to_lowercase().contains(s)
                });
                username_ok && search_ok
            })
            .cloned()
            .collect();
        Ok(Self::paginate(page, matching))
    }

    async fn get_review(&self, id: i64) -> AppResult<Review> {
        let tables = self.inner.tables.read().await;
        tables
            .reviews
            .get(&id)
            .cloned()
            .ok_or_else(|| review_not_found(id))
    }

    async fn update_review(&self, id: i64, input: &ReviewInput) -> AppResult<Review> {
        let mut tables = self.inner.tables.write().await;
        let review = tables
            .reviews
            .get_mut(&id)
            .ok_or_else(|| review_not_found(id))?;
        review.rating = input.rating();
        review.description = input.description.clone();
        review.active = input.active;
        review.updated = Utc::now();
        Ok(review.clone())
    }

    async fn delete_review(&self, id: i64) -> AppResult<()> {
        let mut tables = self.inner.tables.write().await;
        tables
            .reviews
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| review_not_found(id))
    }
}

/// Staged writes guarded by the item mutex, applied on commit
struct MemoryUnitOfWork {
    inner: Arc<Inner>,
    guard: Option<OwnedMutexGuard<()>>,
    item: Option<WatchListItem>,
    review: Option<Review>,
}

impl MemoryUnitOfWork {
    fn locked_id(&self) -> AppResult<i64> {
        match (&self.guard, &self.item) {
            (Some(_), Some(item)) => Ok(item.id),
            _ => Err(AppError::Internal(
                "unit of work used before locking an item".to_string(),
            )),
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_watchlist_item(&mut self, id: i64) -> AppResult<WatchListItem> {
        let guard = self.inner.lock_item(id).await;
        let item = self.inner.tables.read().await.watchlist.get(&id).cloned();

        let item = item.ok_or_else(|| watchlist_not_found(id))?;
        self.guard = Some(guard);
        self.item = Some(item.clone());
        Ok(item)
    }

    async fn review_exists(&mut self, watchlist_id: i64, user_id: i64) -> AppResult<bool> {
        let staged = self
            .review
            .as_ref()
            .is_some_and(|r| r.watchlist_id == watchlist_id && r.review_user_id == user_id);
        let tables = self.inner.tables.read().await;
        Ok(staged || tables.review_exists(watchlist_id, user_id))
    }

    async fn save_watchlist_item(&mut self, item: &WatchListItem) -> AppResult<()> {
        if self.locked_id()? != item.id {
            return Err(AppError::Internal(format!(
                "watch-list item {} is not locked by this unit of work",
                item.id
            )));
        }
        self.item = Some(item.clone());
        Ok(())
    }

    async fn insert_review(&mut self, review: NewReview) -> AppResult<Review> {
        if self.locked_id()? != review.watchlist_id {
            return Err(AppError::Internal(format!(
                "watch-list item {} is not locked by this unit of work",
                review.watchlist_id
            )));
        }
        if self.review.is_some() {
            return Err(AppError::DuplicateReview);
        }

        let mut tables = self.inner.tables.write().await;
        if tables.review_exists(review.watchlist_id, review.review_user_id) {
            return Err(AppError::DuplicateReview);
        }
        let username = tables
            .users
            .get(&review.review_user_id)
            .map(|u| u.username.clone())
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", review.review_user_id)))?;

        let now = Utc::now();
        let stored = Review {
            id: tables.next_id(),
            review_user_id: review.review_user_id,
            review_user: username,
            rating: review.rating,
            description: review.description,
            watchlist_id: review.watchlist_id,
            active: review.active,
            created: now,
            updated: now,
        };
        self.review = Some(stored.clone());
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryUnitOfWork {
            inner,
            guard,
            item,
            review,
        } = *self;
        let mut tables = inner.tables.write().await;

        if let Some(item) = item {
            let row = tables
                .watchlist
                .get_mut(&item.id)
                .ok_or_else(|| watchlist_not_found(item.id))?;
            *row = item;
        }
        if let Some(review) = review {
            tables.reviews.insert(review.id, review);
        }

        drop(tables);
        drop(guard);
        Ok(())
    }
}
