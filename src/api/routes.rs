//! API route table.

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers::{self, ApiState};
use super::ws;

/// `/api/*` routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Captures (latest before the parameterized route)
        .route(
            "/camera-images",
            get(handlers::list_captures).post(handlers::upload_capture),
        )
        .route("/camera-images/latest", get(handlers::latest_capture))
        .route("/camera-images/:id", get(handlers::get_capture))
        .route("/camera-images/:id/reset", post(handlers::reset_capture))
        // Descriptions & generations
        .route("/text-descriptions", post(handlers::create_description))
        .route(
            "/text-descriptions/:camera_image_id",
            get(handlers::description_for_capture),
        )
        .route(
            "/generated-images",
            get(handlers::list_generated).post(handlers::upload_generated),
        )
        .route("/current-state", get(handlers::current_state))
        // Orchestrated pipeline
        .route("/start-pipeline", post(handlers::start_pipeline))
        .route("/pipeline/:generated_image_id", get(handlers::get_pipeline))
        // Housekeeping
        .route("/clear-all", delete(handlers::clear_all))
        .route(
            "/cleanup-undescribed/:keep_image_id",
            post(handlers::cleanup_undescribed),
        )
        .with_state(state)
}

/// Health and websocket endpoints at the root
pub fn root_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::websocket_handler))
        .with_state(state)
}
