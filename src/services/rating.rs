use std::sync::Arc;

use tracing::instrument;

use crate::{
    db::Database,
    error::{AppError, AppResult},
    models::{NewReview, Review, ReviewInput, User, WatchListItem},
};

/// Owns the aggregate rating fields of watch-list items.
///
/// Every mutation runs inside a unit of work that locks the item first, so
/// concurrent submissions for the same item serialize and a failed step
/// leaves neither the review nor the aggregate behind.
#[derive(Clone)]
pub struct RatingService {
    db: Arc<dyn Database>,
}

impl RatingService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Records `user`'s review of an item and folds its rating into the
    /// item's aggregate.
    ///
    /// Fails with [`AppError::DuplicateReview`] when the user already
    /// reviewed the item; nothing is written in that case.
    #[instrument(skip(self, user, input), fields(user_id = user.id, rating = input.rating))]
    pub async fn submit_review(
        &self,
        watchlist_id: i64,
        user: &User,
        input: ReviewInput,
    ) -> AppResult<Review> {
        input.validate()?;

        let mut uow = self.db.begin().await?;
        let mut item = uow.lock_watchlist_item(watchlist_id).await?;

        if uow.review_exists(watchlist_id, user.id).await? {
            tracing::info!(watchlist_id, user_id = user.id, "Rejected duplicate review");
            return Err(AppError::DuplicateReview);
        }

        item.record_rating(input.rating());
        uow.save_watchlist_item(&item).await?;
        let review = uow
            .insert_review(NewReview::from_input(watchlist_id, user, &input))
            .await?;
        uow.commit().await?;

        tracing::info!(
            watchlist_id,
            review_id = review.id,
            avg_rating = item.avg_rating,
            number_rating = item.number_rating,
            "Review recorded"
        );

        Ok(review)
    }

    /// Raises an item's aggregate rating to the floor when it is below it.
    /// Applying it again is a no-op.
    #[instrument(skip(self))]
    pub async fn apply_custom_adjustment(&self, watchlist_id: i64) -> AppResult<WatchListItem> {
        let mut uow = self.db.begin().await?;
        let mut item = uow.lock_watchlist_item(watchlist_id).await?;

        if item.apply_rating_floor() {
            uow.save_watchlist_item(&item).await?;
            uow.commit().await?;
            tracing::info!(watchlist_id, avg_rating = item.avg_rating, "Rating floor applied");
        } else {
            tracing::debug!(watchlist_id, "Rating already at or above floor");
        }

        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDatabase, MockDatabase};
    use crate::models::{PlatformInput, WatchListInput};

    struct Fixture {
        db: MemoryDatabase,
        service: RatingService,
        item: WatchListItem,
    }

    async fn fixture() -> Fixture {
        let db = MemoryDatabase::new();
        let platform = db
            .create_platform(&PlatformInput {
                name: "Prime Video".to_string(),
                about: String::new(),
                website: "https://primevideo.com".to_string(),
            })
            .await
            .unwrap();
        let item = db
            .create_watchlist_item(&WatchListInput {
                title: "Heat".to_string(),
                storyline: String::new(),
                platform_id: platform.id,
                active: true,
            })
            .await
            .unwrap();
        let service = RatingService::new(Arc::new(db.clone()));
        Fixture { db, service, item }
    }

    async fn user(db: &MemoryDatabase, name: &str) -> User {
        db.create_user(name, &format!("{name}@example.com"), false)
            .await
            .0
    }

    async fn state(f: &Fixture) -> (f64, i32) {
        let item = f.db.get_watchlist_item(f.item.id).await.unwrap();
        (item.avg_rating, item.number_rating)
    }

    #[tokio::test]
    async fn test_locked_item_does_not_block_other_items() {
        use std::time::Duration;
        use tokio::time::timeout;

        let f = fixture().await;
        let a = user(&f.db, "a").await;
        let other = f
            .db
            .create_watchlist_item(&WatchListInput {
                title: "Ronin".to_string(),
                storyline: String::new(),
                platform_id: f.item.platform_id,
                active: true,
            })
            .await
            .unwrap();

        let mut held = f.db.begin().await.unwrap();
        held.lock_watchlist_item(f.item.id).await.unwrap();

        let review = timeout(
            Duration::from_secs(1),
            f.service.submit_review(other.id, &a, ReviewInput::new(4)),
        )
        .await
        .expect("review of another item waited on the held lock")
        .unwrap();
        assert_eq!(review.watchlist_id, other.id);

        let mut waiting = f.db.begin().await.unwrap();
        assert!(
            timeout(Duration::from_millis(50), waiting.lock_watchlist_item(f.item.id))
                .await
                .is_err()
        );

        drop(held);
        timeout(Duration::from_secs(1), waiting.lock_watchlist_item(f.item.id))
            .await
            .expect("lock was not released by dropping the unit of work")
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_users_then_duplicate() {
        let f = fixture().await;
        let a = user(&f.db, "a").await;
        let b = user(&f.db, "b").await;

        let review = f
            .service
            .submit_review(f.item.id, &a, ReviewInput::new(5))
            .await
            .unwrap();
        assert_eq!(review.review_user, "a");
        assert_eq!(review.watchlist_id, f.item.id);
        assert_eq!(state(&f).await, (5.0, 1));

        f.service
            .submit_review(f.item.id, &b, ReviewInput::new(3))
            .await
            .unwrap();
        assert_eq!(state(&f).await, (4.0, 2));

        let err = f
            .service
            .submit_review(f.item.id, &a, ReviewInput::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateReview));
        assert_eq!(state(&f).await, (4.0, 2));
    }

    #[tokio::test]
    async fn test_sequence_follows_recurrence() {
        let f = fixture().await;
        let ratings = [2, 5, 1, 4, 4, 3];
        let mut expected = 0.0;

        for (i, rating) in ratings.iter().enumerate() {
            let reviewer = user(&f.db, &format!("user{i}")).await;
            f.service
                .submit_review(f.item.id, &reviewer, ReviewInput::new(*rating))
                .await
                .unwrap();

            expected = if i == 0 {
                f64::from(*rating)
            } else {
                (expected + f64::from(*rating)) / 2.0
            };
            assert_eq!(state(&f).await, (expected, i as i32 + 1));
        }
    }

    #[tokio::test]
    async fn test_invalid_rating_writes_nothing() {
        let f = fixture().await;
        let a = user(&f.db, "a").await;

        let err = f
            .service
            .submit_review(f.item.id, &a, ReviewInput::new(6))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(state(&f).await, (0.0, 0));
    }

    #[tokio::test]
    async fn test_missing_item_is_not_found() {
        let f = fixture().await;
        let a = user(&f.db, "a").await;
        let err = f
            .service
            .submit_review(9999, &a, ReviewInput::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_do_not_lose_updates() {
        let f = fixture().await;
        let a = user(&f.db, "a").await;
        let b = user(&f.db, "b").await;

        let first = {
            let service = f.service.clone();
            let id = f.item.id;
            tokio::spawn(async move { service.submit_review(id, &a, ReviewInput::new(1)).await })
        };
        let second = {
            let service = f.service.clone();
            let id = f.item.id;
            tokio::spawn(async move { service.submit_review(id, &b, ReviewInput::new(5)).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // (1 then 5) and (5 then 1) both serialize to 3.0
        assert_eq!(state(&f).await, (3.0, 2));
    }

    #[tokio::test]
    async fn test_concurrent_three_way_matches_a_serial_order() {
        let f = fixture().await;
        let ratings = [1, 5, 2];
        let mut handles = Vec::new();

        for (i, rating) in ratings.iter().enumerate() {
            let reviewer = user(&f.db, &format!("c{i}")).await;
            let service = f.service.clone();
            let id = f.item.id;
            let rating = *rating;
            handles.push(tokio::spawn(async move {
                service
                    .submit_review(id, &reviewer, ReviewInput::new(rating))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let orders: [[i32; 3]; 6] = [
            [1, 5, 2],
            [1, 2, 5],
            [5, 1, 2],
            [5, 2, 1],
            [2, 1, 5],
            [2, 5, 1],
        ];
        let candidates: Vec<f64> = orders
            .iter()
            .map(|order| {
                let first = f64::from(order[0]);
                let second = (first + f64::from(order[1])) / 2.0;
                (second + f64::from(order[2])) / 2.0
            })
            .collect();

        let (avg, count) = state(&f).await;
        assert_eq!(count, 3);
        assert!(candidates.contains(&avg), "{avg} is not a serial result");
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_admit_one() {
        let f = fixture().await;
        let a = user(&f.db, "a").await;

        let mut handles = Vec::new();
        for rating in [2, 4] {
            let service = f.service.clone();
            let id = f.item.id;
            let reviewer = a.clone();
            handles.push(tokio::spawn(async move {
                service
                    .submit_review(id, &reviewer, ReviewInput::new(rating))
                    .await
            }));
        }

        let mut duplicates = 0;
        for handle in handles {
            if let Err(AppError::DuplicateReview) = handle.await.unwrap() {
                duplicates += 1;
            }
        }
        assert_eq!(duplicates, 1);
        assert_eq!(state(&f).await.1, 1);
    }

    #[tokio::test]
    async fn test_custom_adjustment_floors_and_is_idempotent() {
        let f = fixture().await;
        let a = user(&f.db, "a").await;
        let b = user(&f.db, "b").await;
        f.service
            .submit_review(f.item.id, &a, ReviewInput::new(3))
            .await
            .unwrap();
        f.service
            .submit_review(f.item.id, &b, ReviewInput::new(4))
            .await
            .unwrap();
        assert_eq!(state(&f).await, (3.5, 2));

        let once = f.service.apply_custom_adjustment(f.item.id).await.unwrap();
        assert_eq!(once.avg_rating, 4.0);
        let twice = f.service.apply_custom_adjustment(f.item.id).await.unwrap();
        assert_eq!(twice, once);
        assert_eq!(state(&f).await, (4.0, 2));
    }

    #[tokio::test]
    async fn test_custom_adjustment_missing_item() {
        let mut db = MockDatabase::new();
        db.expect_begin()
            .returning(|| Ok(Box::new(MissingItemUnitOfWork) as Box<dyn crate::db::UnitOfWork>));
        let service = RatingService::new(Arc::new(db));

        let err = service.apply_custom_adjustment(7).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    struct MissingItemUnitOfWork;

    #[async_trait::async_trait]
    impl crate::db::UnitOfWork for MissingItemUnitOfWork {
        async fn lock_watchlist_item(&mut self, id: i64) -> AppResult<WatchListItem> {
            Err(AppError::NotFound(format!("Watch-list item {} not found", id)))
        }
        async fn review_exists(&mut self, _: i64, _: i64) -> AppResult<bool> {
            unreachable!("not called after a failed lock")
        }
        async fn save_watchlist_item(&mut self, _: &WatchListItem) -> AppResult<()> {
            unreachable!("not called after a failed lock")
        }
        async fn insert_review(&mut self, _: NewReview) -> AppResult<Review> {
            unreachable!("not called after a failed lock")
        }
        async fn commit(self: Box<Self>) -> AppResult<()> {
            unreachable!("not called after a failed lock")
        }
    }
}
