use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{authorize, deleted, extract::ValidJson, AppState};
use crate::{
    error::AppResult,
    middleware::MaybeUser,
    models::{PlatformInput, StreamPlatform},
    services::{Access, Resource},
};

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<StreamPlatform>>> {
    Ok(Json(state.db.list_platforms().await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    ValidJson(input): ValidJson<PlatformInput>,
) -> AppResult<(StatusCode, Json<StreamPlatform>)> {
    authorize(user.as_ref(), Resource::Platform, Access::Write)?;
    input.validate()?;

    let platform = state.db.create_platform(&input).await?;
    tracing::info!(id = platform.id, name = %platform.name, "Stream platform created");
    Ok((StatusCode::CREATED, Json(platform)))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<StreamPlatform>> {
    Ok(Json(state.db.get_platform(id).await?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<i64>,
    ValidJson(input): ValidJson<PlatformInput>,
) -> AppResult<Json<StreamPlatform>> {
    authorize(user.as_ref(), Resource::Platform, Access::Write)?;
    input.validate()?;
    Ok(Json(state.db.update_platform(id, &input).await?))
}

/// Removes the platform together with its watch-list items and their reviews
pub async fn delete(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    authorize(user.as_ref(), Resource::Platform, Access::Write)?;
    state.db.delete_platform(id).await?;
    tracing::info!(id, "Stream platform deleted");
    Ok(deleted("Stream platform"))
}
