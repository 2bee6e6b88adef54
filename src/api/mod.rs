//! REST + websocket API module using Axum
//!
//! - `/api/*`: captures, descriptions, generations, pipeline, housekeeping
//! - `/ws`: live relay events for viewer pages
//! - `/captures/*`: uploaded and generated image files
//! - `/health`: service and describer liveness

pub mod envelope;
pub mod handlers;
mod routes;
pub mod ws;

pub use handlers::ApiState;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// HTTP surface settings taken from `[server]`
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            max_upload_bytes: crate::config::defaults::MAX_UPLOAD_BYTES,
        }
    }
}

impl From<&crate::config::ServerConfig> for ApiSettings {
    fn from(server: &crate::config::ServerConfig) -> Self {
        Self {
            cors_origins: server.cors_origins.clone(),
            max_upload_bytes: server.max_upload_bytes,
        }
    }
}

/// Build the CORS layer.
///
/// Viewer pages are served from other ports during development, so an empty
/// origin list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.trim().parse().ok())
        .collect();
    tracing::info!(origins = ?origins, "CORS: allowing configured origins");
    base.allow_origin(allowed)
}

/// Create the complete application router.
pub fn create_app(state: ApiState, settings: &ApiSettings) -> Router {
    let captures = ServeDir::new(state.media.dir());

    Router::new()
        .nest("/api", routes::api_routes(state.clone()))
        .merge(routes::root_routes(state))
        .nest_service("/captures", captures)
        // Middleware
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&settings.cors_origins))
}
