use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use super::{authorize, deleted, extract::ValidJson, AppState};
use crate::{
    error::AppResult,
    middleware::{CurrentUser, MaybeUser, RequestId},
    models::{Page, PageParams, Review, ReviewFilter, ReviewInput, UserReviewQuery},
    services::{Access, Resource},
};

/// Submits the caller's review of a watch-list item
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    CurrentUser(user): CurrentUser,
    Path(watchlist_id): Path<i64>,
    ValidJson(input): ValidJson<ReviewInput>,
) -> AppResult<(StatusCode, Json<Review>)> {
    tracing::debug!(%request_id, watchlist_id, "Review submission received");
    let review = state.ratings.submit_review(watchlist_id, &user, input).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(watchlist_id): Path<i64>,
    Query(filter): Query<ReviewFilter>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<Page<Review>>> {
    let page = params.resolve(state.config.default_page_size)?;
    let reviews = state
        .db
        .list_reviews_for_item(watchlist_id, &filter, page)
        .await?;
    Ok(Json(reviews))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Review>> {
    Ok(Json(state.db.get_review(id).await?))
}

/// Author or staff only. The item's aggregate rating is left as it is.
pub async fn update(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<i64>,
    ValidJson(input): ValidJson<ReviewInput>,
) -> AppResult<Json<Review>> {
    let review = state.db.get_review(id).await?;
    authorize(user.as_ref(), Resource::Review(&review), Access::Write)?;
    input.validate()?;

    let review = state.db.update_review(id, &input).await?;
    tracing::info!(id, rating = review.rating, "Review updated");
    Ok(Json(review))
}

/// Author or staff only
pub async fn delete(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let review = state.db.get_review(id).await?;
    authorize(user.as_ref(), Resource::Review(&review), Access::Write)?;

    state.db.delete_review(id).await?;
    tracing::info!(id, watchlist_id = review.watchlist_id, "Review deleted");
    Ok(deleted("Review"))
}

/// Reviews written by a user, optionally narrowed by a free-text search
pub async fn by_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserReviewQuery>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<Page<Review>>> {
    let page = params.resolve(state.config.default_page_size)?;
    Ok(Json(state.db.list_reviews_by_user(&query, page).await?))
}
