pub mod cart;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod session;
pub mod util;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::AppState;

/// The full HTTP application: routes, request tracing and CORS for the storefront origin.
pub fn app(state: AppState) -> Router {
    handlers::router(&state)
        .layer(cors(&state.base_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(base_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);
    match HeaderValue::from_str(base_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => layer,
    }
}
