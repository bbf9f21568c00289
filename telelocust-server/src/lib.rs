//! # Telelocust Server
//!
//! HTTP front end for [`telelocust_core`]: accepts load-test submissions,
//! reports run state and serves each run's artifacts as a zip archive.

pub mod handlers;
pub mod infra;
pub mod routes;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub use infra::app_state::AppState;

use crate::handlers::health;

pub fn create_app(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state);
    let body_limit = state.config().limits.max_body_bytes;

    Router::new()
        .route("/", get(health::index_handler))
        .route("/up", get(health::up_handler))
        .merge(routes::create_api_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// An empty origin list disables cross-origin access; `*` allows any
/// origin.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let cors = &state.config().cors;
    let allow_origin = if cors.is_wildcard_included() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([header::LOCATION, header::CONTENT_DISPOSITION])
}
