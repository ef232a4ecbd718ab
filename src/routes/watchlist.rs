use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use super::{deleted, extract::ValidJson, AppState};
use crate::{
    error::AppResult,
    middleware::CurrentUser,
    models::{WatchListFilter, WatchListInput, WatchListItem},
};

pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Query(filter): Query<WatchListFilter>,
) -> AppResult<Json<Vec<WatchListItem>>> {
    Ok(Json(state.db.list_watchlist(&filter).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ValidJson(input): ValidJson<WatchListInput>,
) -> AppResult<(StatusCode, Json<WatchListItem>)> {
    input.validate()?;
    let item = state.db.create_watchlist_item(&input).await?;
    tracing::info!(id = item.id, user = %user.username, "Watch-list item created");
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<WatchListItem>> {
    Ok(Json(state.db.get_watchlist_item(id).await?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
    ValidJson(input): ValidJson<WatchListInput>,
) -> AppResult<Json<WatchListItem>> {
    input.validate()?;
    Ok(Json(state.db.update_watchlist_item(id, &input).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    state.db.delete_watchlist_item(id).await?;
    tracing::info!(id, user = %user.username, "Watch-list item deleted");
    Ok(deleted("Watch-list item"))
}

/// Raises the item's aggregate rating to the floor
pub async fn custom_action(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let item = state.ratings.apply_custom_adjustment(id).await?;
    Ok(Json(json!({
        "message": "Custom action executed",
        "id": item.id,
        "avg_rating": item.avg_rating,
        "number_rating": item.number_rating,
    })))
}
