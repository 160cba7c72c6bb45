//! 路由

use axum::{
    Router,
    handler::Handler,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use super::cache::cache_response;
use super::handlers::{
    AppState, create_user, delete_user, fallback, get_user, health, list_users, metrics,
    update_user,
};
use super::trace::{make_request_span, panic_response, propagate_trace};

pub fn build_router(state: AppState) -> Router {
    let cached_get_user = get_user.layer(from_fn_with_state(state.clone(), cache_response));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/users", post(create_user).get(list_users))
        .route(
            "/api/v1/users/{id}",
            get(cached_get_user).put(update_user).delete(delete_user),
        )
        .fallback(fallback)
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(CorsLayer::permissive())
        .layer(from_fn(propagate_trace))
}
