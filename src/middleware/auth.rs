use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use crate::{
    error::{AppError, AppResult},
    models::User,
    routes::AppState,
};

/// Authenticated user resolved earlier in the request, stored in extensions
#[derive(Clone, Debug)]
pub struct ResolvedUser(pub Option<User>);

/// Extracts the API token from `Authorization: Token <key>` or
/// `Authorization: Bearer <key>`.
///
/// Returns `Ok(None)` when there is no header or it uses another scheme.
pub fn token_from_headers(headers: &HeaderMap) -> AppResult<Option<&str>> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AppError::Unauthorized)?;

    let mut parts = value.split_whitespace();
    let scheme = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }

    match (parts.next(), parts.next()) {
        (Some(token), None) => Ok(Some(token)),
        _ => Err(AppError::Unauthorized),
    }
}

/// Resolves the caller, rejecting unknown tokens
pub async fn resolve_user(headers: &HeaderMap, state: &AppState) -> AppResult<Option<User>> {
    match token_from_headers(headers)? {
        None => Ok(None),
        Some(token) => state
            .db
            .user_by_token(token)
            .await?
            .map(Some)
            .ok_or(AppError::Unauthorized),
    }
}

async fn user_from_parts(parts: &mut Parts, state: &AppState) -> AppResult<Option<User>> {
    if let Some(ResolvedUser(user)) = parts.extensions.get::<ResolvedUser>() {
        return Ok(user.clone());
    }

    let user = resolve_user(&parts.headers, state).await?;
    if let Some(user) = &user {
        tracing::Span::current().record("user", user.username.as_str());
    }
    parts.extensions.insert(ResolvedUser(user.clone()));
    Ok(user)
}

/// The caller, who must be authenticated
pub struct CurrentUser(pub User);

/// The caller, if any credentials were presented
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        user_from_parts(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(user_from_parts(parts, state).await?))
    }
}
