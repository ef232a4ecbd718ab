use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, COOKIE, VARY},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};

use super::{authorize, deleted, extract::ValidJson, AppState};
use crate::{
    cached,
    db::CacheKey,
    error::AppResult,
    middleware::{CurrentUser, MaybeUser},
    models::{WatchListFilter, WatchListInput, WatchListItem},
    services::{Access, Resource},
};

/// Every movie on the list, cached per caller when Redis is configured
pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let filter = WatchListFilter::default();
    let ttl = state.config.movie_list_cache_ttl;

    let items: Vec<WatchListItem> = match &state.cache {
        Some(cache) => {
            let key = CacheKey::movie_list(
                header_str(&headers, AUTHORIZATION),
                header_str(&headers, COOKIE),
            );
            let result: AppResult<Vec<WatchListItem>> =
                cached!(cache, key, ttl, state.db.list_watchlist(&filter));
            result?
        }
        None => state.db.list_watchlist(&filter).await?,
    };

    let cache_control = HeaderValue::from_str(&format!("max-age={}", ttl))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));

    Ok((
        [
            (CACHE_CONTROL, cache_control),
            (VARY, HeaderValue::from_static("Authorization, Cookie")),
        ],
        Json(items),
    ))
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ValidJson(input): ValidJson<WatchListInput>,
) -> AppResult<(StatusCode, Json<WatchListItem>)> {
    input.validate()?;
    let item = state.db.create_watchlist_item(&input).await?;
    tracing::info!(id = item.id, user = %user.username, "Movie created");
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<WatchListItem>> {
    Ok(Json(state.db.get_watchlist_item(id).await?))
}

/// Staff only
pub async fn update(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<i64>,
    ValidJson(input): ValidJson<WatchListInput>,
) -> AppResult<Json<WatchListItem>> {
    authorize(user.as_ref(), Resource::Platform, Access::Write)?;
    input.validate()?;
    Ok(Json(state.db.update_watchlist_item(id, &input).await?))
}

/// Staff only
pub async fn delete(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    authorize(user.as_ref(), Resource::Platform, Access::Write)?;
    state.db.delete_watchlist_item(id).await?;
    tracing::info!(id, "Movie deleted");
    Ok(deleted("Movie"))
}
