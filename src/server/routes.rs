//! Router configuration for the batch server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/batch", post(handlers::process_batch))
        .route("/api/health", get(handlers::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
