//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        .route("/shutdown", post(handlers::shutdown))
        // Entities
        .route("/entities", get(handlers::list_entities))
        .route(
            "/entities/:level/:scope/:name",
            get(handlers::get_entity)
                .put(handlers::put_entity)
                .delete(handlers::delete_entity),
        )
        // Resolver
        .route("/credentials/:identity", get(handlers::get_credential))
        // Events
        .route("/events", get(handlers::get_events))
        .route("/events/stream", get(handlers::stream_events));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
