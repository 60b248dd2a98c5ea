pub mod checkout;
pub mod dev;
pub mod orders;
pub mod webhooks;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::middleware::require_session;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: &AppState) -> Router<AppState> {
    let buyer = Router::new()
        .route("/api/checkout_session", post(checkout::create_checkout_session))
        .layer(middleware::from_fn_with_state(state.clone(), require_session));

    let router = Router::new()
        .route("/health", get(health))
        .merge(buyer)
        .merge(webhooks::router())
        .merge(orders::router());

    if state.dev_mode {
        tracing::warn!("Dev endpoints enabled under /dev");
        router.merge(dev::router())
    } else {
        router
    }
}
