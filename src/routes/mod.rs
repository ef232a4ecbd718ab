use std::sync::Arc;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::{Layer, ServiceBuilder};
use tower_http::{cors::CorsLayer, normalize_path::NormalizePathLayer, trace::TraceLayer};

use crate::{
    config::Config,
    db::{Cache, Database},
    error::{AppError, AppResult},
    middleware::{
        make_span_with_request_id, request_id_middleware, throttle_middleware, ThrottleScope,
        Throttles,
    },
    models::User,
    services::{permissions, Access, RatingService, Resource},
};

pub mod extract;
pub mod movies;
pub mod platforms;
pub mod reviews;
pub mod watchlist;

/// Shared handler state
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub ratings: RatingService,
    /// Response cache; `None` when no Redis is configured
    pub cache: Option<Cache>,
    pub throttles: Throttles,
    pub config: Config,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, cache: Option<Cache>, config: Config) -> Self {
        Self {
            ratings: RatingService::new(db.clone()),
            throttles: Throttles::from_config(&config),
            db,
            cache,
            config,
        }
    }
}

/// Turns a failed permission check into 401 for anonymous callers and 403
/// for everyone else
pub(crate) fn authorize(
    actor: Option<&User>,
    resource: Resource<'_>,
    access: Access,
) -> AppResult<()> {
    if permissions::is_permitted(actor, resource, access) {
        Ok(())
    } else if actor.is_none() {
        Err(AppError::Unauthorized)
    } else {
        Err(AppError::Forbidden)
    }
}

/// Body returned alongside a successful delete
pub(crate) fn deleted(what: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NO_CONTENT,
        Json(json!({ "message": format!("{} deleted successfully", what) })),
    )
}

/// Creates the application router with all routes.
///
/// Paths are matched with any trailing slash trimmed, so `/watch/1/reviews/`
/// and `/watch/1/reviews` reach the same handler.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let app: Router = Router::new()
        .route("/health", get(health_check))
        .nest("/watch", watch_routes(&state))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    // Routing happens inside `Router`, so the rewrite has to wrap it from outside
    Router::new().fallback_service(NormalizePathLayer::trim_trailing_slash().layer(app))
}

/// Routes under /watch, grouped by the throttles they share
fn watch_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    const ANON: &[ThrottleScope] = &[ThrottleScope::Anon];
    const REVIEW_CREATE: &[ThrottleScope] = &[ThrottleScope::ReviewCreate];
    const REVIEW_LIST: &[ThrottleScope] = &[ThrottleScope::ReviewList, ThrottleScope::Anon];
    const REVIEW_DETAIL: &[ThrottleScope] = &[ThrottleScope::ReviewDetail, ThrottleScope::Anon];
    const USER_REVIEWS: &[ThrottleScope] = &[ThrottleScope::User, ThrottleScope::Anon];

    let catalog = Router::new()
        .route("/", get(movies::list).post(movies::create))
        .route(
            "/:id",
            get(movies::detail).put(movies::update).delete(movies::delete),
        )
        .route("/stream", get(platforms::list).post(platforms::create))
        .route(
            "/stream/:id",
            get(platforms::detail)
                .put(platforms::update)
                .delete(platforms::delete),
        )
        .route("/watchlist", get(watchlist::list).post(watchlist::create))
        .route(
            "/watchlist/:id",
            get(watchlist::detail)
                .put(watchlist::update)
                .delete(watchlist::delete),
        )
        .route("/watchlist/:id/custom-action", post(watchlist::custom_action));

    let review_create = Router::new().route("/:id/reviews/create", post(reviews::create));
    let review_list = Router::new().route("/:id/reviews", get(reviews::list));
    let review_detail = Router::new().route(
        "/reviews/:id",
        get(reviews::detail).put(reviews::update).delete(reviews::delete),
    );
    let user_reviews = Router::new().route("/user-reviews", get(reviews::by_user));

    Router::new()
        .merge(throttled(catalog, state, ANON))
        .merge(throttled(review_create, state, REVIEW_CREATE))
        .merge(throttled(review_list, state, REVIEW_LIST))
        .merge(throttled(review_detail, state, REVIEW_DETAIL))
        .merge(throttled(user_reviews, state, USER_REVIEWS))
}

fn throttled(
    router: Router<Arc<AppState>>,
    state: &Arc<AppState>,
    scopes: &'static [ThrottleScope],
) -> Router<Arc<AppState>> {
    let state = state.clone();
    router.route_layer(middleware::from_fn(move |request: Request, next: Next| {
        throttle_middleware(state.clone(), scopes, request, next)
    }))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
