use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};

use super::{platform_not_found, review_not_found, watchlist_not_found, Database, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::{
        NewReview, Page, PageRequest, PlatformInput, Review, ReviewFilter, ReviewInput,
        StreamPlatform, User, UserReviewQuery, WatchListFilter, WatchListInput, WatchListItem,
    },
};

const WATCHLIST_COLUMNS: &str =
    "id, title, storyline, platform_id, active, avg_rating, number_rating, created";

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.review_user_id, u.username AS review_user, r.rating, r.description,
           r.watchlist_id, r.active, r.created, r.updated
    FROM reviews r
    JOIN users u ON u.id = r.review_user_id
"#;

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Maps a missing foreign key onto the client field that referenced it
fn foreign_key_to_field(err: sqlx::Error, field: &str) -> AppError {
    match err.as_database_error() {
        Some(db_err) if db_err.is_foreign_key_violation() => {
            AppError::field(field, "Invalid pk - object does not exist.")
        }
        _ => AppError::Database(err),
    }
}

/// PostgreSQL-backed storage
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema migrations
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn user_by_token(&self, token: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.email, u.is_staff
            FROM auth_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.key = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_platforms(&self) -> AppResult<Vec<StreamPlatform>> {
        let platforms = sqlx::query_as::<_, StreamPlatform>(
            "SELECT id, name, about, website FROM stream_platforms ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(platforms)
    }

    async fn get_platform(&self, id: i64) -> AppResult<StreamPlatform> {
        sqlx::query_as::<_, StreamPlatform>(
            "SELECT id, name, about, website FROM stream_platforms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| platform_not_found(id))
    }

    async fn create_platform(&self, input: &PlatformInput) -> AppResult<StreamPlatform> {
        let platform = sqlx::query_as::<_, StreamPlatform>(
            r#"
            INSERT INTO stream_platforms (name, about, website)
            VALUES ($1, $2, $3)
            RETURNING id, name, about, website
            "#,
        )
        .bind(&input.name)
        .bind(&input.about)
        .bind(&input.website)
        .fetch_one(&self.pool)
        .await?;

        Ok(platform)
    }

    async fn update_platform(&self, id: i64, input: &PlatformInput) -> AppResult<StreamPlatform> {
        sqlx::query_as::<_, StreamPlatform>(
            r#"
            UPDATE stream_platforms SET name = $2, about = $3, website = $4
            WHERE id = $1
            RETURNING id, name, about, website
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.about)
        .bind(&input.website)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| platform_not_found(id))
    }

    async fn delete_platform(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM stream_platforms WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(platform_not_found(id));
        }
        Ok(())
    }

    async fn list_watchlist(&self, filter: &WatchListFilter) -> AppResult<Vec<WatchListItem>> {
        let sql = format!(
            r#"
            SELECT {WATCHLIST_COLUMNS} FROM watchlist
            WHERE ($1::text IS NULL OR title = $1)
              AND ($2::bigint IS NULL OR platform_id = $2)
            ORDER BY id
            "#
        );
        let items = sqlx::query_as::<_, WatchListItem>(&sql)
            .bind(filter.title.as_deref())
            .bind(filter.platform)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    async fn get_watchlist_item(&self, id: i64) -> AppResult<WatchListItem> {
        let sql = format!("SELECT {WATCHLIST_COLUMNS} FROM watchlist WHERE id = $1");
        sqlx::query_as::<_, WatchListItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| watchlist_not_found(id))
    }

    async fn create_watchlist_item(&self, input: &WatchListInput) -> AppResult<WatchListItem> {
        let sql = format!(
            r#"
            INSERT INTO watchlist (title, storyline, platform_id, active)
            VALUES ($1, $2, $3, $4)
            RETURNING {WATCHLIST_COLUMNS}
            "#
        );
        sqlx::query_as::<_, WatchListItem>(&sql)
            .bind(&input.title)
            .bind(&input.storyline)
            .bind(input.platform_id)
            .bind(input.active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| foreign_key_to_field(e, "platform"))
    }

    async fn update_watchlist_item(
        &self,
        id: i64,
        input: &WatchListInput,
    ) -> AppResult<WatchListItem> {
        let sql = format!(
            r#"
            UPDATE watchlist SET title = $2, storyline = $3, platform_id = $4, active = $5
            WHERE id = $1
            RETURNING {WATCHLIST_COLUMNS}
            "#
        );
        sqlx::query_as::<_, WatchListItem>(&sql)
            .bind(id)
            .bind(&input.title)
            .bind(&input.storyline)
            .bind(input.platform_id)
            .bind(input.active)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| foreign_key_to_field(e, "platform"))?
            .ok_or_else(|| watchlist_not_found(id))
    }

    async fn delete_watchlist_item(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM watchlist WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(watchlist_not_found(id));
        }
        Ok(())
    }

    async fn list_reviews_for_item(
        &self,
        watchlist_id: i64,
        filter: &ReviewFilter,
        page: PageRequest,
    ) -> AppResult<Page<Review>> {
        let condition = r#"
            WHERE r.watchlist_id = $1
              AND ($2::text IS NULL OR u.username = $2)
              AND ($3::bool IS NULL OR r.active = $3)
        "#;

        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM reviews r JOIN users u ON u.id = r.review_user_id {condition}"
        ))
        .bind(watchlist_id)
        .bind(filter.username.as_deref())
        .bind(filter.active)
        .fetch_one(&self.pool)
        .await?;

        let reviews = sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} {condition} ORDER BY r.id LIMIT $4 OFFSET $5"
        ))
        .bind(watchlist_id)
        .bind(filter.username.as_deref())
        .bind(filter.active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(page, count as u64, reviews))
    }

    async fn list_reviews_by_user(
        &self,
        query: &UserReviewQuery,
        page: PageRequest,
    ) -> AppResult<Page<Review>> {
        let condition = r#"
            WHERE ($1::text IS NULL OR u.username = $1)
              AND ($2::text IS NULL
                   OR u.username ILIKE '%' || $2 || '%'
                   OR u.email ILIKE '%' || $2 || '%')
        "#;

        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM reviews r JOIN users u ON u.id = r.review_user_id {condition}"
        ))
        .bind(query.username.as_deref())
        .bind(query.search.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let reviews = sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} {condition} ORDER BY r.id LIMIT $3 OFFSET $4"
        ))
        .bind(query.username.as_deref())
        .bind(query.search.as_deref())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(page, count as u64, reviews))
    }

    async fn get_review(&self, id: i64) -> AppResult<Review> {
        sqlx::query_as::<_, Review>(&format!("{REVIEW_SELECT} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| review_not_found(id))
    }

    async fn update_review(&self, id: i64, input: &ReviewInput) -> AppResult<Review> {
        sqlx::query_as::<_, Review>(
            r#"
            WITH updated AS (
                UPDATE reviews
                SET rating = $2, description = $3, active = $4, updated = now()
                WHERE id = $1
                RETURNING *
            )
            SELECT r.id, r.review_user_id, u.username AS review_user, r.rating, r.description,
                   r.watchlist_id, r.active, r.created, r.updated
            FROM updated r
            JOIN users u ON u.id = r.review_user_id
            "#,
        )
        .bind(id)
        .bind(input.rating())
        .bind(input.description.as_deref())
        .bind(input.active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| review_not_found(id))
    }

    async fn delete_review(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(review_not_found(id));
        }
        Ok(())
    }
}

/// Transaction holding a row lock on one watch-list item
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_watchlist_item(&mut self, id: i64) -> AppResult<WatchListItem> {
        let sql = format!("SELECT {WATCHLIST_COLUMNS} FROM watchlist WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, WatchListItem>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| watchlist_not_found(id))
    }

    async fn review_exists(&mut self, watchlist_id: i64, user_id: i64) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reviews WHERE watchlist_id = $1 AND review_user_id = $2)",
        )
        .bind(watchlist_id)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn save_watchlist_item(&mut self, item: &WatchListItem) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE watchlist SET avg_rating = $2, number_rating = $3 WHERE id = $1",
        )
        .bind(item.id)
        .bind(item.avg_rating)
        .bind(item.number_rating)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(watchlist_not_found(item.id));
        }
        Ok(())
    }

    async fn insert_review(&mut self, review: NewReview) -> AppResult<Review> {
        sqlx::query_as::<_, Review>(
            r#"
            WITH inserted AS (
                INSERT INTO reviews (review_user_id, watchlist_id, rating, description, active)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            )
            SELECT r.id, r.review_user_id, u.username AS review_user, r.rating, r.description,
                   r.watchlist_id, r.active, r.created, r.updated
            FROM inserted r
            JOIN users u ON u.id = r.review_user_id
            "#,
        )
        .bind(review.review_user_id)
        .bind(review.watchlist_id)
        .bind(review.rating)
        .bind(review.description.as_deref())
        .bind(review.active)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => AppError::DuplicateReview,
            _ => AppError::Database(e),
        })
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
